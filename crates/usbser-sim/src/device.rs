//! Virtual device actor task
//!
//! A virtual device owns the far end of a `tokio::io::duplex()` pair and
//! plays the part of the hardware: it records what the host writes, answers
//! according to its [`DeviceBehavior`], and can be told to inject bytes or
//! to "unplug" (drop its end, which the host sees as end of stream).

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How a virtual device answers the host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceBehavior {
    /// Write every received byte straight back
    #[default]
    Echo,
    /// Accept writes, never answer
    Silent,
    /// Answer each received newline with a fixed reply (modem style)
    LineReply { reply: Vec<u8> },
}

/// Commands that can be sent to a virtual device task
#[derive(Debug)]
pub enum VirtualDeviceCommand {
    /// Send bytes to the host as if the device produced them
    Inject(Vec<u8>),
    /// Drop the connection, as if the cable was pulled
    Unplug,
}

/// Test-side handle to a running virtual device
pub struct VirtualDeviceHandle {
    path: String,
    cmd_tx: mpsc::Sender<VirtualDeviceCommand>,
    written_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    closed_rx: watch::Receiver<bool>,
}

impl VirtualDeviceHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Push bytes towards the host; false once the device is gone
    pub async fn inject(&self, data: &[u8]) -> bool {
        self.cmd_tx
            .send(VirtualDeviceCommand::Inject(data.to_vec()))
            .await
            .is_ok()
    }

    /// Simulate the device being detached
    pub async fn unplug(&self) {
        let _ = self.cmd_tx.send(VirtualDeviceCommand::Unplug).await;
    }

    /// Next chunk the host wrote to the device
    pub async fn recv_written(&mut self) -> Option<Vec<u8>> {
        self.written_rx.recv().await
    }

    /// Whether the device task is still attached to the host
    pub fn is_open(&self) -> bool {
        !*self.closed_rx.borrow()
    }

    /// Wait until the host side has released the device
    pub async fn wait_closed(&mut self) {
        let _ = self.closed_rx.wait_for(|closed| *closed).await;
    }
}

/// Spawn a virtual device task on `stream`
///
/// Returns the test-side handle and a receiver that flips to `true` when
/// the task ends.
pub fn spawn_virtual_device(
    path: &str,
    stream: DuplexStream,
    behavior: DeviceBehavior,
) -> (VirtualDeviceHandle, watch::Receiver<bool>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);

    let name = path.to_string();
    tokio::spawn(async move {
        if let Err(e) = run_virtual_device(stream, &name, behavior, cmd_rx, written_tx).await {
            warn!("Virtual device {} stream error: {}", name, e);
        }
        let _ = closed_tx.send(true);
    });

    let handle = VirtualDeviceHandle {
        path: path.to_string(),
        cmd_tx,
        written_rx,
        closed_rx: closed_rx.clone(),
    };
    (handle, closed_rx)
}

/// Run a virtual device until the host closes, or it is unplugged
pub async fn run_virtual_device(
    mut stream: DuplexStream,
    name: &str,
    behavior: DeviceBehavior,
    mut cmd_rx: mpsc::Receiver<VirtualDeviceCommand>,
    written_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> io::Result<()> {
    let mut buf = [0u8; 1024];
    let mut commands_open = true;

    info!("Starting virtual device {} ({:?})", name, behavior);

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Host released virtual device {}", name);
                        break;
                    }
                    Ok(n) => {
                        let data = &buf[..n];
                        debug!("Virtual device {} received {} bytes: {:02X?}", name, n, data);
                        let _ = written_tx.send(data.to_vec());

                        match &behavior {
                            DeviceBehavior::Echo => {
                                stream.write_all(data).await?;
                                stream.flush().await?;
                            }
                            DeviceBehavior::Silent => {}
                            DeviceBehavior::LineReply { reply } => {
                                for _ in data.iter().filter(|&&b| b == b'\n') {
                                    stream.write_all(reply).await?;
                                }
                                stream.flush().await?;
                            }
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            cmd = cmd_rx.recv(), if commands_open => {
                match cmd {
                    Some(VirtualDeviceCommand::Inject(data)) => {
                        debug!("Virtual device {} injecting {} bytes", name, data.len());
                        stream.write_all(&data).await?;
                        stream.flush().await?;
                    }
                    Some(VirtualDeviceCommand::Unplug) => {
                        info!("Virtual device {} unplugged", name);
                        break;
                    }
                    None => {
                        // Handle dropped; keep serving the host
                        commands_open = false;
                    }
                }
            }
        }
    }

    info!("Virtual device task ended for {}", name);
    Ok(())
}

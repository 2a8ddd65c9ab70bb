//! Subcommand implementations

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use usbser_detect::{DeviceDescriptor, DeviceSource};
use usbser_session::{read_window, SessionEvent, SessionManager};
use usbser_transport::{Connector, SerialConfig};

use crate::settings::Settings;

/// Observer channel depth for interactive sessions
const EVENT_CHANNEL_SIZE: usize = 256;

/// Space-separated uppercase hex
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a delimiter written with C-style escapes (`\r\n`, `\x03`, `\\`)
pub fn parse_escapes(input: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&hex, 16)
                    .with_context(|| format!("invalid hex escape \\x{}", hex))?;
                out.push(byte);
            }
            Some(other) => bail!("unknown escape \\{}", other),
            None => bail!("dangling backslash"),
        }
    }
    if out.is_empty() {
        bail!("delimiter must not be empty");
    }
    Ok(out)
}

/// Find a device by port key, system path, or numeric device id
pub fn resolve_device(devices: &[DeviceDescriptor], query: &str) -> Result<DeviceDescriptor> {
    let id = query.parse::<u32>().ok();
    devices
        .iter()
        .find(|d| d.key == query || d.path == query || Some(d.device_id) == id)
        .cloned()
        .with_context(|| format!("no device matching '{}' (try `usbser list`)", query))
}

fn print_data(bytes: &[u8], show_hex: bool) {
    if show_hex {
        println!("{}", hex_dump(bytes));
    } else {
        println!("{}", String::from_utf8_lossy(bytes).trim_end_matches(['\r', '\n']));
    }
}

fn print_event(event: &SessionEvent, show_hex: bool) {
    match event {
        SessionEvent::Data { frame, .. } => print_data(&frame.bytes, show_hex),
        SessionEvent::Error {
            kind,
            message,
            fatal,
            ..
        } => {
            let severity = if *fatal { "fatal" } else { "error" };
            eprintln!("[{} {}] {}", severity, kind, message);
        }
        SessionEvent::StateChanged { to, .. } => info!("Session {}", to),
        SessionEvent::Disconnected { reason, .. } => eprintln!("[disconnected: {:?}]", reason),
    }
}

/// `usbser list`
pub fn list<S: DeviceSource, C: Connector>(manager: &SessionManager<S, C>, json: bool) -> Result<()> {
    let devices = manager.list_devices()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No USB serial devices found");
        return Ok(());
    }
    for device in &devices {
        println!(
            "{:<10} {:04X}:{:04X} {:<8} {}",
            device.device_id,
            device.vendor_id,
            device.product_id,
            device.chip.as_deref().unwrap_or("-"),
            device.display_label()
        );
    }
    Ok(())
}

/// `usbser monitor`: print incoming frames, send stdin lines
pub async fn monitor<S: DeviceSource, C: Connector>(
    manager: &SessionManager<S, C>,
    device: &str,
    config: SerialConfig,
    settings: &Settings,
) -> Result<()> {
    let device = resolve_device(&manager.list_devices()?, device)?;
    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let session = manager.connect(&device, config, tx).await?;
    eprintln!(
        "Connected to {} @ {} (Ctrl-C to quit)",
        device.display_label(),
        session.config()
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let mut bytes = line.into_bytes();
                    bytes.extend_from_slice(settings.line_ending.as_bytes());
                    if let Err(e) = session.write(&bytes).await {
                        eprintln!("write failed: {}", e);
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },

            event = rx.recv() => match event {
                Some(event) => {
                    print_event(&event, settings.show_hex);
                    if event.is_terminal() {
                        return Ok(());
                    }
                }
                None => break,
            }
        }
    }

    manager.disconnect(&session).await?;
    let stats = session.stats();
    info!(
        "{} bytes in, {} bytes out, {} frames",
        stats.bytes_read, stats.bytes_written, stats.frames
    );
    Ok(())
}

/// `usbser send`: write one message and print whatever comes back
pub async fn send<S: DeviceSource, C: Connector>(
    manager: &SessionManager<S, C>,
    device: &str,
    message: &str,
    config: SerialConfig,
    settings: &Settings,
    window: Duration,
) -> Result<()> {
    let device = resolve_device(&manager.list_devices()?, device)?;
    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let session = manager.connect(&device, config, tx).await?;

    let mut bytes = message.as_bytes().to_vec();
    bytes.extend_from_slice(settings.line_ending.as_bytes());
    let written = session.write(&bytes).await?;
    info!("Wrote {} byte(s) to {}", written, device.path);

    let read = read_window(&mut rx, window).await;
    for event in read.events.iter().filter(|e| e.is_error() || e.is_terminal()) {
        print_event(event, settings.show_hex);
    }
    if read.bytes_read() > 0 {
        print_data(&read.data, settings.show_hex);
    } else {
        eprintln!("(no reply within {} ms)", window.as_millis());
    }

    manager.disconnect(&session).await?;
    Ok(())
}

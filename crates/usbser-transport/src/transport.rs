//! Byte transport over an open serial channel
//!
//! [`SerialTransport`] is a thin wrapper: it reads what the driver has,
//! writes whole buffers under a timeout, and closes. It never retries.
//!
//! The transport is generic over the I/O type so that in-memory streams
//! (`tokio::io::duplex()`) can stand in for a real device.

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};
use tracing::{debug, warn};

use crate::config::SerialConfig;
use crate::error::TransportError;

/// Size of a single read from the driver
pub const READ_CHUNK_SIZE: usize = 4096;

/// An async byte stream with optional modem line control
///
/// Real serial ports drive DTR/RTS and purge driver buffers; in-memory
/// streams keep the no-op defaults.
pub trait SerialIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Set the DTR and RTS output lines
    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> io::Result<()> {
        let _ = (dtr, rts);
        Ok(())
    }

    /// Discard anything pending in the driver's input and output buffers
    fn purge(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialIo for SerialStream {
    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> io::Result<()> {
        self.write_data_terminal_ready(dtr)?;
        self.write_request_to_send(rts)?;
        Ok(())
    }

    fn purge(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::All)?;
        Ok(())
    }
}

impl SerialIo for tokio::io::DuplexStream {}

/// Poll a reader exactly once; `None` means nothing is available yet
async fn poll_read_now<R>(reader: &mut R, buf: &mut [u8]) -> Option<io::Result<usize>>
where
    R: AsyncRead + Unpin,
{
    let mut read_buf = ReadBuf::new(buf);
    let polled = poll_fn(|cx| match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
        Poll::Pending => Poll::Ready(None),
        Poll::Ready(result) => Poll::Ready(Some(result)),
    })
    .await;
    polled.map(|result| result.map(|()| read_buf.filled().len()))
}

async fn write_with_timeout<W>(
    port: &str,
    writer: &mut W,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, TransportError>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(data).await?;
        writer.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => {
            debug!("WRITE {}B to {}: {:02X?}", data.len(), port, data);
            Ok(data.len())
        }
        Ok(Err(e)) => Err(TransportError::io(port, e)),
        Err(_) => Err(TransportError::WriteTimeout {
            port: port.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

fn finish_read(port: &str, buffer: &[u8], result: io::Result<usize>) -> Result<Vec<u8>, TransportError> {
    match result {
        Ok(0) => Err(TransportError::Disconnected(port.to_string())),
        Ok(n) => {
            debug!("READ {}B from {}: {:02X?}", n, port, &buffer[..n]);
            Ok(buffer[..n].to_vec())
        }
        Err(e) => Err(TransportError::io(port, e)),
    }
}

/// An open serial channel
pub struct SerialTransport<T> {
    port: String,
    io: Option<T>,
    config: SerialConfig,
    buffer: Vec<u8>,
}

impl<T: SerialIo> SerialTransport<T> {
    /// Wrap an already-open stream
    pub fn new(port: impl Into<String>, io: T, config: SerialConfig) -> Self {
        Self {
            port: port.into(),
            io: Some(io),
            config,
            buffer: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    fn io_mut(&mut self) -> Result<&mut T, TransportError> {
        self.io
            .as_mut()
            .ok_or_else(|| TransportError::Closed(self.port.clone()))
    }

    /// Bring the line up after open: assert DTR/RTS as configured, purge buffers
    pub fn prepare(&mut self) -> Result<(), TransportError> {
        let (dtr, rts) = (self.config.dtr, self.config.rts);
        let port = self.port.clone();
        let io = self.io_mut()?;
        io.set_control_lines(dtr, rts)
            .and_then(|()| io.purge())
            .map_err(|e| TransportError::io(&port, e))
    }

    /// Return whatever bytes the driver already has, without waiting
    ///
    /// An empty vector means nothing is pending.
    pub async fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let Some(io) = self.io.as_mut() else {
            return Err(TransportError::Closed(self.port.clone()));
        };
        match poll_read_now(io, &mut self.buffer).await {
            None => Ok(Vec::new()),
            Some(result) => finish_read(&self.port, &self.buffer, result),
        }
    }

    /// Wait for the next chunk of bytes
    pub async fn read_chunk(&mut self) -> Result<Vec<u8>, TransportError> {
        let Some(io) = self.io.as_mut() else {
            return Err(TransportError::Closed(self.port.clone()));
        };
        let result = io.read(&mut self.buffer).await;
        finish_read(&self.port, &self.buffer, result)
    }

    /// Write the whole buffer, returning the number of bytes written
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let timeout = self.config.write_timeout();
        let Some(io) = self.io.as_mut() else {
            return Err(TransportError::Closed(self.port.clone()));
        };
        write_with_timeout(&self.port, io, data, timeout).await
    }

    /// Purge, drop DTR/RTS and release the channel
    ///
    /// The channel is released even when the line teardown fails; the
    /// first teardown failure is returned.
    pub fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut io) = self.io.take() else {
            return Ok(());
        };
        let purged = io.purge();
        if let Err(e) = &purged {
            warn!("Purge failed while closing {}: {}", self.port, e);
        }
        let lines = io.set_control_lines(false, false);
        if let Err(e) = &lines {
            warn!("Dropping DTR/RTS failed while closing {}: {}", self.port, e);
        }
        drop(io);
        debug!("Closed {}", self.port);
        purged
            .and(lines)
            .map_err(|e| TransportError::io(&self.port, e))
    }

    /// Split into independently owned read and write halves
    pub fn into_split(mut self) -> Result<(TransportReader<T>, TransportWriter<T>), TransportError> {
        let io = self
            .io
            .take()
            .ok_or_else(|| TransportError::Closed(self.port.clone()))?;
        let (read_half, write_half) = tokio::io::split(io);
        let reader = TransportReader {
            port: self.port.clone(),
            half: read_half,
            config: self.config.clone(),
            buffer: std::mem::take(&mut self.buffer),
        };
        let writer = TransportWriter {
            port: self.port.clone(),
            half: write_half,
            write_timeout: self.config.write_timeout(),
        };
        Ok((reader, writer))
    }
}

/// Read half of a split transport
pub struct TransportReader<T> {
    port: String,
    half: ReadHalf<T>,
    config: SerialConfig,
    buffer: Vec<u8>,
}

impl<T: SerialIo> TransportReader<T> {
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Wait for the next chunk of bytes
    pub async fn read_chunk(&mut self) -> Result<Vec<u8>, TransportError> {
        let result = self.half.read(&mut self.buffer).await;
        finish_read(&self.port, &self.buffer, result)
    }

    /// Return whatever bytes are already available, without waiting
    pub async fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        match poll_read_now(&mut self.half, &mut self.buffer).await {
            None => Ok(Vec::new()),
            Some(result) => finish_read(&self.port, &self.buffer, result),
        }
    }

    /// Rejoin with the write half taken from the same transport
    ///
    /// # Panics
    ///
    /// Panics if `writer` came from a different transport.
    pub fn unsplit(self, writer: TransportWriter<T>) -> SerialTransport<T> {
        let mut buffer = self.buffer;
        buffer.resize(READ_CHUNK_SIZE, 0);
        SerialTransport {
            port: self.port,
            io: Some(self.half.unsplit(writer.half)),
            config: self.config,
            buffer,
        }
    }
}

/// Write half of a split transport
pub struct TransportWriter<T> {
    port: String,
    half: WriteHalf<T>,
    write_timeout: Duration,
}

impl<T: SerialIo> TransportWriter<T> {
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Write the whole buffer, returning the number of bytes written
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        write_with_timeout(&self.port, &mut self.half, data, self.write_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn transport(io: tokio::io::DuplexStream) -> SerialTransport<tokio::io::DuplexStream> {
        SerialTransport::new("/dev/ttyTEST0", io, SerialConfig::default())
    }

    #[tokio::test]
    async fn test_read_available_is_non_blocking() {
        let (near, _far) = duplex(64);
        let mut t = transport(near);

        let data = t.read_available().await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read_from_peer() {
        let (near, mut far) = duplex(64);
        let mut t = transport(near);

        assert_eq!(t.write(b"PING\r\n").await.unwrap(), 6);

        let mut buf = [0u8; 16];
        let n = far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PING\r\n");

        far.write_all(b"PONG").await.unwrap();
        let data = t.read_chunk().await.unwrap();
        assert_eq!(data, b"PONG");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (near, _far) = duplex(64);
        let mut t = transport(near);
        t.close().unwrap();

        assert!(!t.is_open());
        assert!(matches!(
            t.write(b"x").await,
            Err(TransportError::Closed(_))
        ));
        assert!(matches!(
            t.read_available().await,
            Err(TransportError::Closed(_))
        ));
        // Closing twice is harmless
        assert!(t.close().is_ok());
    }

    #[tokio::test]
    async fn test_peer_drop_reports_disconnect() {
        let (near, far) = duplex(64);
        let mut t = transport(near);
        drop(far);

        assert!(matches!(
            t.read_chunk().await,
            Err(TransportError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_write_times_out_when_peer_stalls() {
        let (near, _far) = duplex(4);
        let config = SerialConfig {
            write_timeout_ms: 20,
            ..Default::default()
        };
        let mut t = SerialTransport::new("/dev/ttyTEST1", near, config);

        let err = t.write(&[0u8; 64]).await.unwrap_err();
        assert!(matches!(err, TransportError::WriteTimeout { timeout_ms: 20, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_split_and_unsplit() {
        let (near, mut far) = duplex(64);
        let t = transport(near);

        let (mut reader, mut writer) = t.into_split().unwrap();
        assert!(reader.read_available().await.unwrap().is_empty());

        writer.write(b"abc").await.unwrap();
        far.write_all(b"xyz").await.unwrap();

        let mut buf = [0u8; 8];
        let n = far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");
        assert_eq!(reader.read_chunk().await.unwrap(), b"xyz");

        far.write_all(b"123").await.unwrap();
        assert_eq!(reader.read_available().await.unwrap(), b"123");

        let mut t = reader.unsplit(writer);
        assert!(t.is_open());
        assert!(t.close().is_ok());
    }
}

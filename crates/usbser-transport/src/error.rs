//! Error types for the serial transport

use std::io;

use thiserror::Error;

/// Invalid or unsupported line configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Baud rate outside the supported range
    #[error("unsupported baud rate: {0}")]
    BaudRate(u32),

    /// Data bits other than 5..=8
    #[error("unsupported data bits: {0}")]
    DataBits(u8),

    /// Stop bit setting the driver cannot produce
    #[error("unsupported stop bits: {0}")]
    StopBits(u8),

    /// Unknown or unsupported parity
    #[error("unsupported parity: {0}")]
    Parity(String),

    /// Write timeout of zero
    #[error("write timeout must be greater than zero")]
    WriteTimeout,
}

/// Errors raised while locating or opening a device
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device at the given path
    #[error("device not found: {0}")]
    NotFound(String),

    /// The OS refused access to the device
    #[error("permission denied for {0}")]
    PermissionDenied(String),

    /// Device is held open elsewhere
    #[error("device {0} is busy or in use")]
    Busy(String),

    /// The driver rejected the open or the line setup
    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },
}

impl DeviceError {
    /// Map a `serialport` open failure onto a device error
    pub fn from_serialport(path: &str, err: tokio_serial::Error) -> Self {
        match err.kind {
            tokio_serial::ErrorKind::NoDevice => Self::NotFound(path.to_string()),
            tokio_serial::ErrorKind::Io(io::ErrorKind::NotFound) => Self::NotFound(path.to_string()),
            tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                Self::PermissionDenied(path.to_string())
            }
            _ => Self::OpenFailed {
                path: path.to_string(),
                reason: err.description,
            },
        }
    }
}

/// Errors on an open transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was closed locally
    #[error("transport {0} is closed")]
    Closed(String),

    /// The device went away (end of stream)
    #[error("device {0} disconnected")]
    Disconnected(String),

    /// A write did not complete within the configured timeout
    #[error("write to {port} timed out after {timeout_ms}ms")]
    WriteTimeout { port: String, timeout_ms: u64 },

    /// Underlying I/O failure
    #[error("I/O error on {port}: {source}")]
    Io {
        port: String,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    pub(crate) fn io(port: &str, source: io::Error) -> Self {
        Self::Io {
            port: port.to_string(),
            source,
        }
    }

    /// Errors that leave the channel usable (a retry may succeed)
    pub fn is_transient(&self) -> bool {
        match self {
            Self::WriteTimeout { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            Self::Closed(_) | Self::Disconnected(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialport_error_mapping() {
        let err = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "gone");
        assert!(matches!(
            DeviceError::from_serialport("/dev/ttyUSB0", err),
            DeviceError::NotFound(p) if p == "/dev/ttyUSB0"
        ));

        let err = tokio_serial::Error::new(
            tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied),
            "EACCES",
        );
        assert!(matches!(
            DeviceError::from_serialport("/dev/ttyACM0", err),
            DeviceError::PermissionDenied(_)
        ));

        let err = tokio_serial::Error::new(tokio_serial::ErrorKind::InvalidInput, "bad baud");
        match DeviceError::from_serialport("COM3", err) {
            DeviceError::OpenFailed { path, reason } => {
                assert_eq!(path, "COM3");
                assert_eq!(reason, "bad baud");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_transient_classification() {
        let timeout = TransportError::io("p", io::Error::from(io::ErrorKind::TimedOut));
        assert!(timeout.is_transient());

        let broken = TransportError::io("p", io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!broken.is_transient());

        assert!(!TransportError::Disconnected("p".into()).is_transient());
    }
}

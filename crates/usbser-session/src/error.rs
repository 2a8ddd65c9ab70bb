//! Error types for the session manager

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use usbser_detect::DetectError;
use usbser_framing::FramingError;
use usbser_transport::{ConfigError, DeviceError, TransportError};

/// Coarse error category reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Device missing, busy, or refused
    Device,
    /// Open or handshake failure, timeout, duplicate connection
    Connection,
    /// Read/write fault or closed transport
    Io,
    /// Invalid configuration
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Device => "device",
            Self::Connection => "connection",
            Self::Io => "io",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

/// Errors returned by sessions and the session manager
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    /// Opening or bringing up the connection failed
    #[error("connection to {key} failed: {reason}")]
    Connection { key: String, reason: String },

    /// The open did not finish in time
    #[error("connection to {key} timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    #[error("{0} is already connected")]
    AlreadyConnected(String),

    #[error("{0} is not connected")]
    NotConnected(String),

    #[error(transparent)]
    Io(#[from] TransportError),

    #[error("invalid serial configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid framing configuration: {0}")]
    Framing(#[from] FramingError),

    /// Several operations of a batch failed
    #[error("{} operation(s) failed: {}", .0.len(), .0.join("; "))]
    Multiple(Vec<String>),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Device(_) | Self::Detect(_) => ErrorKind::Device,
            Self::Connection { .. } | Self::Timeout { .. } | Self::AlreadyConnected(_) => {
                ErrorKind::Connection
            }
            Self::Io(_) | Self::NotConnected(_) | Self::Multiple(_) => ErrorKind::Io,
            Self::Config(_) | Self::Framing(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SessionError::from(DeviceError::Busy("/dev/ttyUSB0".into())).kind(),
            ErrorKind::Device
        );
        assert_eq!(
            SessionError::Timeout {
                key: "k".into(),
                timeout_ms: 5000
            }
            .kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            SessionError::from(TransportError::Closed("k".into())).kind(),
            ErrorKind::Io
        );
        assert_eq!(
            SessionError::from(ConfigError::BaudRate(0)).kind(),
            ErrorKind::Config
        );
        assert_eq!(
            SessionError::from(FramingError::EmptyDelimiter).kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn test_multiple_lists_every_failure() {
        let err = SessionError::Multiple(vec![
            "a: not connected".to_string(),
            "b: I/O error".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "2 operation(s) failed: a: not connected; b: I/O error"
        );
    }
}

//! Error types for device enumeration

use thiserror::Error;

/// Errors that can occur while enumerating devices
#[derive(Debug, Error)]
pub enum DetectError {
    /// The OS enumeration call failed
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),
}

//! Error types for framing configuration

use thiserror::Error;

/// Invalid framing or buffer configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Delimiter policy with no delimiter bytes
    #[error("delimiter must not be empty")]
    EmptyDelimiter,

    /// Forced-split length shorter than the delimiter itself
    #[error("max frame length {max} is shorter than the {delimiter_len}-byte delimiter")]
    FrameLimitTooSmall { max: usize, delimiter_len: usize },

    /// Buffer that can hold nothing
    #[error("buffer capacity must be greater than zero")]
    ZeroCapacity,

    /// Buffer too small to ever reach the forced-split length
    #[error("buffer capacity {capacity} is below the max frame length {max}")]
    CapacityBelowFrameLimit { capacity: usize, max: usize },

    /// Buffer too small to hold one delimiter
    #[error("buffer capacity {capacity} cannot hold the {delimiter_len}-byte delimiter")]
    CapacityBelowDelimiter { capacity: usize, delimiter_len: usize },
}

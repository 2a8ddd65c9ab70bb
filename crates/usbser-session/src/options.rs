//! Session options

use std::time::Duration;

use serde::{Deserialize, Serialize};
use usbser_framing::{FramingError, FramingPolicy, DEFAULT_BUFFER_CAPACITY};

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// How many transient read errors in a row a session tolerates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadErrorPolicy {
    /// The error that reaches this count ends the session; 0 or 1 makes every error fatal
    pub max_consecutive: u32,
}

impl Default for ReadErrorPolicy {
    fn default() -> Self {
        Self { max_consecutive: 3 }
    }
}

/// Per-connection behavior, shared by every session a manager opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub connect_timeout_ms: u64,
    pub framing: FramingPolicy,
    /// Inbound buffer size in bytes
    pub buffer_capacity: usize,
    pub read_errors: ReadErrorPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            framing: FramingPolicy::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            read_errors: ReadErrorPolicy::default(),
        }
    }
}

impl SessionOptions {
    pub fn with_framing(mut self, framing: FramingPolicy) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), FramingError> {
        self.framing.validate(self.buffer_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SessionOptions::default();
        assert_eq!(options.connect_timeout(), Duration::from_secs(5));
        assert_eq!(options.framing, FramingPolicy::Passthrough);
        assert_eq!(options.read_errors.max_consecutive, 3);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"framing": {"type": "delimiter", "delimiter": [13, 10]}}"#;
        let options: SessionOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.framing, FramingPolicy::delimited(b"\r\n"));
        assert_eq!(options.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn test_invalid_framing_is_rejected() {
        let options = SessionOptions::default()
            .with_framing(FramingPolicy::Delimiter {
                delimiter: b"\n".to_vec(),
                include_delimiter: false,
                max_frame_len: Some(1024),
            })
            .with_buffer_capacity(512);
        assert_eq!(
            options.validate(),
            Err(FramingError::CapacityBelowFrameLimit {
                capacity: 512,
                max: 1024
            })
        );
    }
}

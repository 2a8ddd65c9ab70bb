//! Events delivered to a session's observer
//!
//! Each connection has exactly one observer: the bounded channel passed to
//! `connect`. Reads, errors and lifecycle changes all arrive on it in the
//! order they happened. The channel is bounded, so an observer that stops
//! draining it pauses reads from the device.

use tokio::sync::mpsc;
use usbser_framing::Frame;

use crate::error::ErrorKind;
use crate::state::SessionState;

/// Sending half handed to `connect`
pub type Observer = mpsc::Sender<SessionEvent>;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect` was called
    Requested,
    /// The device went away
    DeviceDetached,
    /// An unrecoverable I/O error
    Failed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved between lifecycle states
    StateChanged {
        key: String,
        from: SessionState,
        to: SessionState,
    },

    /// A frame arrived from the device
    Data { key: String, frame: Frame },

    /// Something went wrong
    Error {
        key: String,
        kind: ErrorKind,
        message: String,
        /// The session is ending because of this error
        fatal: bool,
    },

    /// The session is closed and the device released
    Disconnected {
        key: String,
        reason: DisconnectReason,
    },
}

impl SessionEvent {
    /// Port key of the session this event belongs to
    pub fn key(&self) -> &str {
        match self {
            SessionEvent::StateChanged { key, .. }
            | SessionEvent::Data { key, .. }
            | SessionEvent::Error { key, .. }
            | SessionEvent::Disconnected { key, .. } => key,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, SessionEvent::Data { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SessionEvent::Error { .. })
    }

    /// Check if this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Disconnected { .. })
    }

    /// Frame bytes, for data events
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            SessionEvent::Data { frame, .. } => Some(&frame.bytes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classification() {
        let data = SessionEvent::Data {
            key: "/dev/ttyUSB0_1".to_string(),
            frame: Frame {
                bytes: b"OK".to_vec(),
                complete: true,
            },
        };
        assert!(data.is_data());
        assert!(!data.is_terminal());
        assert_eq!(data.data(), Some(&b"OK"[..]));
        assert_eq!(data.key(), "/dev/ttyUSB0_1");

        let error = SessionEvent::Error {
            key: "k".to_string(),
            kind: ErrorKind::Io,
            message: "read failed".to_string(),
            fatal: false,
        };
        assert!(error.is_error());
        assert_eq!(error.data(), None);

        let gone = SessionEvent::Disconnected {
            key: "k".to_string(),
            reason: DisconnectReason::DeviceDetached,
        };
        assert!(gone.is_terminal());
    }
}

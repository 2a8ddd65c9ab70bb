//! Session lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a session is in its lifecycle
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Closing -> Disconnected
///                     |             |
///                     +--> Error <--+
///                            |
///                            +--> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Error,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Closing)
                | (Connected, Error)
                | (Closing, Disconnected)
                | (Error, Disconnected)
        )
    }

    /// Holding (or about to hold) a device open
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Closing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Disconnected));
    }

    #[test]
    fn test_error_transitions() {
        assert!(Connecting.can_transition_to(Error));
        assert!(Connected.can_transition_to(Error));
        assert!(Error.can_transition_to(Disconnected));

        assert!(!Error.can_transition_to(Connected));
        assert!(!Closing.can_transition_to(Error));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connected));
    }

    #[test]
    fn test_active_states() {
        assert!(Connected.is_active());
        assert!(Closing.is_active());
        assert!(!Error.is_active());
        assert!(!Disconnected.is_active());
        assert_eq!(Connected.to_string(), "connected");
    }
}

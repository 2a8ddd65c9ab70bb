//! Pull-style reads on top of the event stream
//!
//! Some hosts want "read whatever arrives in the next second and a half"
//! rather than a stream of events. [`read_window`] collects data events for
//! a bounded window and stops early once the line goes quiet.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::events::SessionEvent;

/// Default length of a read window
pub const DEFAULT_READ_WINDOW: Duration = Duration::from_millis(1500);

/// Once data has arrived, this much silence ends the window
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Result of a windowed read
#[derive(Debug, Default)]
pub struct WindowRead {
    /// Frame bytes in arrival order, concatenated
    pub data: Vec<u8>,
    /// Non-data events received during the window, in order
    pub events: Vec<SessionEvent>,
    /// The observer channel closed during the window
    pub closed: bool,
}

impl WindowRead {
    pub fn bytes_read(&self) -> usize {
        self.data.len()
    }

    /// Lossy UTF-8 view of the data
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Collect data from `rx` for at most `window`
///
/// Returns early when data has arrived and nothing more comes for
/// [`QUIET_PERIOD`], or when a terminal event is received.
pub async fn read_window(rx: &mut mpsc::Receiver<SessionEvent>, window: Duration) -> WindowRead {
    let deadline = Instant::now() + window;
    let mut result = WindowRead::default();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let wait = if result.data.is_empty() {
            remaining
        } else {
            remaining.min(QUIET_PERIOD)
        };

        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(SessionEvent::Data { frame, .. })) => result.data.extend_from_slice(&frame.bytes),
            Ok(Some(event)) => {
                let terminal = event.is_terminal();
                result.events.push(event);
                if terminal {
                    break;
                }
            }
            Ok(None) => {
                result.closed = true;
                break;
            }
            Err(_) => break,
        }
    }
    result
}

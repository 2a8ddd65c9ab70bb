//! USB Serial Session Manager
//!
//! Owns the connection lifecycle for USB serial devices: enumerate, open a
//! [`Session`] per device, deliver framed reads to an observer channel, and
//! serialize writes. Sessions move through
//! `Disconnected -> Connecting -> Connected -> Closing -> Disconnected`,
//! with `Error` on the way down when something fatal happens.
//!
//! # Example
//!
//! ```rust,no_run
//! use tokio::sync::mpsc;
//! use usbser_session::{SessionEvent, SessionManager};
//! use usbser_transport::SerialConfig;
//!
//! # async fn run() -> Result<(), usbser_session::SessionError> {
//! let manager = SessionManager::system();
//! let Some(device) = manager.list_devices()?.into_iter().next() else {
//!     return Ok(());
//! };
//!
//! let (tx, mut rx) = mpsc::channel(64);
//! let session = manager.connect(&device, SerialConfig::new(115_200), tx).await?;
//! session.write(b"AT\r\n").await?;
//!
//! while let Some(event) = rx.recv().await {
//!     if let SessionEvent::Data { frame, .. } = &event {
//!         println!("{}", frame.text());
//!     }
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! manager.disconnect(&session).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod manager;
pub mod options;
pub mod read;
pub mod session;
pub mod state;

pub use error::{ErrorKind, SessionError};
pub use events::{DisconnectReason, Observer, SessionEvent};
pub use manager::SessionManager;
pub use options::{ReadErrorPolicy, SessionOptions, DEFAULT_CONNECT_TIMEOUT_MS};
pub use read::{read_window, WindowRead, DEFAULT_READ_WINDOW, QUIET_PERIOD};
pub use session::{Session, SessionStats};
pub use state::SessionState;

//! USB Serial Transport
//!
//! Raw byte I/O against a serial endpoint: open with a line configuration,
//! read what is available, write whole buffers, close. No framing and no
//! retries live here.
//!
//! # Example
//!
//! ```rust,no_run
//! use usbser_transport::{Connector, SerialConfig, SerialConnector};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = SerialConnector::new();
//! let mut transport = connector.open("/dev/ttyUSB0", &SerialConfig::new(115_200)).await?;
//!
//! transport.write(b"AT\r\n").await?;
//! let reply = transport.read_available().await?;
//! println!("{} bytes pending", reply.len());
//! transport.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod transport;

pub use config::{
    DataBits, FlowControl, Parity, ParitySetting, SerialConfig, SerialSettings, StopBits,
    DEFAULT_BAUD_RATE, DEFAULT_WRITE_TIMEOUT_MS, MAX_BAUD_RATE, MIN_BAUD_RATE,
};
pub use connector::{Connector, SerialConnector};
pub use error::{ConfigError, DeviceError, TransportError};
pub use transport::{SerialIo, SerialTransport, TransportReader, TransportWriter, READ_CHUNK_SIZE};

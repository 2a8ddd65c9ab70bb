//! Opening transports
//!
//! A [`Connector`] turns a device path and a line configuration into an
//! open [`SerialTransport`]. [`SerialConnector`] opens real ports through
//! `tokio-serial`; simulators provide their own connectors.

use std::future::Future;
use std::time::Duration;

use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

use crate::config::SerialConfig;
use crate::error::DeviceError;
use crate::transport::{SerialIo, SerialTransport};

/// Opens transports for device paths
pub trait Connector: Send + Sync + 'static {
    /// Stream type of the transports this connector produces
    type Io: SerialIo;

    /// Open `path` with the given line configuration
    ///
    /// The configuration is expected to be validated already.
    fn open(
        &self,
        path: &str,
        config: &SerialConfig,
    ) -> impl Future<Output = Result<SerialTransport<Self::Io>, DeviceError>> + Send;
}

/// Opens real serial ports
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Driver-level read timeout
    pub driver_timeout: Duration,
}

impl SerialConnector {
    pub fn new() -> Self {
        Self {
            driver_timeout: Duration::from_millis(100),
        }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for SerialConnector {
    type Io = SerialStream;

    fn open(
        &self,
        path: &str,
        config: &SerialConfig,
    ) -> impl Future<Output = Result<SerialTransport<SerialStream>, DeviceError>> + Send {
        let path = path.to_string();
        let config = config.clone();
        let driver_timeout = self.driver_timeout;

        async move {
            let stream = tokio_serial::new(&path, config.baud_rate)
                .data_bits(config.data_bits.into())
                .stop_bits(config.stop_bits.into())
                .parity(config.parity.into())
                .flow_control(config.flow_control.into())
                .timeout(driver_timeout)
                .open_native_async()
                .map_err(|e| DeviceError::from_serialport(&path, e))?;

            let mut transport = SerialTransport::new(path.clone(), stream, config);
            if let Err(e) = transport.prepare() {
                warn!("Line setup failed on {}: {}", path, e);
                let _ = transport.close();
                return Err(DeviceError::OpenFailed {
                    path,
                    reason: e.to_string(),
                });
            }

            info!(
                "OPEN ok {} @ {} DTR={} RTS={}",
                path,
                transport.config(),
                transport.config().dtr,
                transport.config().rts
            );
            Ok(transport)
        }
    }
}

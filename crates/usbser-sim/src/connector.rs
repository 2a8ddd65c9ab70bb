//! Connector and device source backed by virtual devices

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::watch;
use tracing::{debug, info};
use usbser_detect::{DetectError, DeviceDescriptor, DeviceSource};
use usbser_transport::{Connector, DeviceError, SerialConfig, SerialTransport};

use crate::device::{spawn_virtual_device, DeviceBehavior, VirtualDeviceHandle};

/// pid.codes test VID
pub const SIM_VENDOR_ID: u16 = 0x1209;
pub const SIM_PRODUCT_ID: u16 = 0x5E51;

/// Size of the in-memory pipe between host and device
const PIPE_CAPACITY: usize = 64 * 1024;

/// Configuration for one virtual device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDeviceConfig {
    pub path: String,
    #[serde(default)]
    pub behavior: DeviceBehavior,
}

#[derive(Default)]
struct VirtualPort {
    descriptor: Option<DeviceDescriptor>,
    behavior: DeviceBehavior,
    open_delay: Option<Duration>,
    reject_reason: Option<String>,
    closed_rx: Option<watch::Receiver<bool>>,
    handle: Option<VirtualDeviceHandle>,
    opens: usize,
}

impl VirtualPort {
    fn is_open(&self) -> bool {
        self.closed_rx.as_ref().is_some_and(|rx| !*rx.borrow())
    }
}

/// Registry of virtual devices
///
/// Cheap to clone; clones share the same devices.
#[derive(Clone, Default)]
pub struct VirtualConnector {
    ports: Arc<Mutex<HashMap<String, VirtualPort>>>,
}

impl VirtualConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration
    pub fn from_configs(configs: &[VirtualDeviceConfig]) -> Self {
        let connector = Self::new();
        for config in configs {
            connector.add_device(&config.path, config.behavior.clone());
        }
        connector
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VirtualPort>> {
        self.ports.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a virtual device at `path`
    pub fn add_device(&self, path: &str, behavior: DeviceBehavior) -> DeviceDescriptor {
        let mut descriptor = DeviceDescriptor::new(path, SIM_VENDOR_ID, SIM_PRODUCT_ID);
        descriptor.manufacturer = Some("usbser".to_string());
        descriptor.product = Some("Virtual Serial Device".to_string());
        descriptor.serial_number = Some(format!("SIM{:08X}", descriptor.device_id));

        let mut ports = self.lock();
        let port = ports.entry(path.to_string()).or_default();
        port.descriptor = Some(descriptor.clone());
        port.behavior = behavior;
        info!("Added virtual device {}", path);
        descriptor
    }

    /// Make every open of `path` fail with `reason`
    pub fn reject_open(&self, path: &str, reason: &str) {
        if let Some(port) = self.lock().get_mut(path) {
            port.reject_reason = Some(reason.to_string());
        }
    }

    /// Delay opens of `path`, to exercise connect timeouts
    pub fn set_open_delay(&self, path: &str, delay: Duration) {
        if let Some(port) = self.lock().get_mut(path) {
            port.open_delay = Some(delay);
        }
    }

    /// Take the device-side handle of the most recent open of `path`
    pub fn take_handle(&self, path: &str) -> Option<VirtualDeviceHandle> {
        self.lock().get_mut(path).and_then(|port| port.handle.take())
    }

    /// Whether the host currently holds `path` open
    pub fn is_open(&self, path: &str) -> bool {
        self.lock().get(path).is_some_and(VirtualPort::is_open)
    }

    /// Number of successful opens of `path`
    pub fn open_count(&self, path: &str) -> usize {
        self.lock().get(path).map_or(0, |port| port.opens)
    }

    /// Wait until the host has released `path`
    pub async fn wait_released(&self, path: &str) {
        let rx = self.lock().get(path).and_then(|port| port.closed_rx.clone());
        if let Some(mut rx) = rx {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }

    /// Checks done before the (possibly delayed) open
    fn check_open(&self, path: &str) -> Result<(DeviceBehavior, Option<Duration>), DeviceError> {
        let ports = self.lock();
        let port = ports
            .get(path)
            .filter(|port| port.descriptor.is_some())
            .ok_or_else(|| DeviceError::NotFound(path.to_string()))?;
        if let Some(reason) = &port.reject_reason {
            return Err(DeviceError::OpenFailed {
                path: path.to_string(),
                reason: reason.clone(),
            });
        }
        if port.is_open() {
            return Err(DeviceError::Busy(path.to_string()));
        }
        Ok((port.behavior.clone(), port.open_delay))
    }

    fn attach(&self, path: &str, behavior: DeviceBehavior) -> Result<DuplexStream, DeviceError> {
        let mut ports = self.lock();
        let port = ports
            .get_mut(path)
            .ok_or_else(|| DeviceError::NotFound(path.to_string()))?;
        // Another open may have won while we were delayed
        if port.is_open() {
            return Err(DeviceError::Busy(path.to_string()));
        }
        let (host, device) = duplex(PIPE_CAPACITY);
        let (handle, closed_rx) = spawn_virtual_device(path, device, behavior);
        port.handle = Some(handle);
        port.closed_rx = Some(closed_rx);
        port.opens += 1;
        Ok(host)
    }
}

impl Connector for VirtualConnector {
    type Io = DuplexStream;

    fn open(
        &self,
        path: &str,
        config: &SerialConfig,
    ) -> impl Future<Output = Result<SerialTransport<DuplexStream>, DeviceError>> + Send {
        let this = self.clone();
        let path = path.to_string();
        let config = config.clone();

        async move {
            let (behavior, delay) = this.check_open(&path)?;
            if let Some(delay) = delay {
                debug!("Delaying open of {} by {:?}", path, delay);
                tokio::time::sleep(delay).await;
            }

            let host = this.attach(&path, behavior)?;
            let mut transport = SerialTransport::new(path.clone(), host, config);
            transport.prepare().map_err(|e| DeviceError::OpenFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

            info!("OPEN ok {} @ {} (virtual)", path, transport.config());
            Ok(transport)
        }
    }
}

impl DeviceSource for VirtualConnector {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
        let mut devices: Vec<_> = self
            .lock()
            .values()
            .filter_map(|port| port.descriptor.clone())
            .collect();
        devices.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(devices)
    }
}

//! USB serial device scanner
//!
//! This module provides device enumeration.

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortInfo, SerialPortType};
use tracing::{debug, info};

use crate::error::DetectError;
use crate::usb_ids::{driver_for, DriverKind};

/// Immutable snapshot of one attached USB serial device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Registry key: `<path>_<device_id>`
    #[serde(rename = "deviceKey")]
    pub key: String,
    /// Stable numeric id derived from the path
    pub device_id: u32,
    /// System path (e.g. /dev/ttyUSB0, COM3)
    #[serde(rename = "deviceName")]
    pub path: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
    /// Bridge chip family, when the VID/PID is known
    pub chip: Option<String>,
}

impl DeviceDescriptor {
    /// Build a descriptor for a USB device at `path`
    pub fn new(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        let path = path.into();
        let device_id = device_id_for_path(&path);
        Self {
            key: format!("{}_{}", path, device_id),
            device_id,
            path,
            vendor_id,
            product_id,
            serial_number: None,
            manufacturer: None,
            product: None,
            chip: driver_for(vendor_id, product_id).map(|d| d.name().to_string()),
        }
    }

    /// Create from the serialport crate's port info; non-USB ports yield `None`
    fn from_serialport(info: &SerialPortInfo) -> Option<Self> {
        match &info.port_type {
            SerialPortType::UsbPort(usb) => {
                let mut desc = Self::new(info.port_name.clone(), usb.vid, usb.pid);
                desc.serial_number = usb.serial_number.clone();
                desc.manufacturer = usb.manufacturer.clone();
                desc.product = usb.product.clone();
                Some(desc)
            }
            _ => None,
        }
    }

    /// Driver family of this device, if known
    pub fn driver(&self) -> Option<DriverKind> {
        driver_for(self.vendor_id, self.product_id)
    }

    /// Label for listings: "ttyUSB0 (CP2102 USB to UART)" or just the path
    pub fn display_label(&self) -> String {
        match self.product.as_deref().or(self.chip.as_deref()) {
            Some(product) => format!("{} ({})", self.path, product),
            None => self.path.clone(),
        }
    }
}

/// Derive a stable 32-bit device id from a system path (FNV-1a)
pub fn device_id_for_path(path: &str) -> u32 {
    const OFFSET: u32 = 0x811C_9DC5;
    const PRIME: u32 = 0x0100_0193;
    path.bytes()
        .fold(OFFSET, |hash, b| (hash ^ b as u32).wrapping_mul(PRIME))
}

/// Anything that can list attached devices
pub trait DeviceSource: Send + Sync + 'static {
    /// List compatible devices; an empty list is not an error
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DetectError>;
}

/// Scanner configuration
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Skip ports whose path contains any of these patterns
    pub skip_patterns: Vec<String>,
    /// Only report devices whose VID/PID is in the known-chip table
    pub known_chips_only: bool,
}

/// Enumerates USB serial devices through the OS
pub struct DeviceScanner {
    config: ScannerConfig,
}

impl DeviceScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self {
            config: ScannerConfig {
                skip_patterns: vec![
                    // Bluetooth ports on macOS
                    "Bluetooth".to_string(),
                    // Debug/logging ports
                    "debug".to_string(),
                ],
                known_chips_only: false,
            },
        }
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Turn raw OS port info into filtered descriptors
    fn collect(&self, ports: &[SerialPortInfo]) -> Vec<DeviceDescriptor> {
        ports
            .iter()
            .filter_map(DeviceDescriptor::from_serialport)
            .filter(|d| !self.should_skip(d))
            .collect()
    }

    fn should_skip(&self, device: &DeviceDescriptor) -> bool {
        if self
            .config
            .skip_patterns
            .iter()
            .any(|pattern| device.path.contains(pattern.as_str()))
        {
            debug!("Skipping {} (matches skip pattern)", device.path);
            return true;
        }
        if self.config.known_chips_only && device.driver().is_none() {
            debug!(
                "Skipping {} ({:04X}:{:04X} not a known chip)",
                device.path, device.vendor_id, device.product_id
            );
            return true;
        }
        false
    }
}

impl DeviceSource for DeviceScanner {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
        info!("Enumerating USB serial devices...");
        let ports =
            available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        let result = self.collect(&ports);

        if result.is_empty() {
            info!("No USB serial devices found");
        } else {
            info!("Found {} USB serial device(s)", result.len());
            for device in &result {
                info!(
                    "  {} {:04X}:{:04X} - {}",
                    device.key,
                    device.vendor_id,
                    device.product_id,
                    device.product.as_deref().unwrap_or("Unknown")
                );
            }
        }

        Ok(result)
    }
}

impl Default for DeviceScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed device list, for simulation and tests
impl DeviceSource for Vec<DeviceDescriptor> {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
        Ok(self.clone())
    }
}

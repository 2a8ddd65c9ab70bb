//! USB Serial Device Detection
//!
//! This crate enumerates the USB serial devices attached to the host and
//! describes each one with an immutable [`DeviceDescriptor`]. Devices that
//! are not on USB (built-in UARTs, Bluetooth ports) are filtered out.
//!
//! # Example
//!
//! ```rust,no_run
//! use usbser_detect::{DeviceScanner, DeviceSource};
//!
//! let scanner = DeviceScanner::new();
//! for device in scanner.list_devices().unwrap() {
//!     println!("{} {:04X}:{:04X}", device.key, device.vendor_id, device.product_id);
//! }
//! ```

pub mod error;
pub mod scanner;
pub mod usb_ids;

pub use error::DetectError;
pub use scanner::{device_id_for_path, DeviceDescriptor, DeviceScanner, DeviceSource, ScannerConfig};
pub use usb_ids::{driver_for, DriverKind, UsbId};

//! Virtual USB serial devices
//!
//! Stand-ins for real hardware so sessions can be exercised without a
//! cable attached. Each open spawns a device task on one end of an
//! in-memory duplex pipe and hands the other end to the host as a
//! [`SerialTransport`](usbser_transport::SerialTransport).

pub mod connector;
pub mod device;

pub use connector::{VirtualConnector, VirtualDeviceConfig, SIM_PRODUCT_ID, SIM_VENDOR_ID};
pub use device::{
    run_virtual_device, spawn_virtual_device, DeviceBehavior, VirtualDeviceCommand,
    VirtualDeviceHandle,
};

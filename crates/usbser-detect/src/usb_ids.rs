//! USB Vendor/Product ID database for USB-to-serial bridge chips
//!
//! These are the chip families that Android's USB serial drivers talk to
//! directly. On desktop systems the OS driver handles them, so the table is
//! used for labelling and for the optional "known drivers only" filter.

/// USB Vendor ID / Product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// FTDI (Future Technology Devices International)
pub mod ftdi {
    use super::UsbId;

    pub const VID: u16 = 0x0403;

    pub const FT232R: UsbId = UsbId::new(VID, 0x6001);
    pub const FT2232: UsbId = UsbId::new(VID, 0x6010);
    pub const FT4232: UsbId = UsbId::new(VID, 0x6011);
    pub const FT232H: UsbId = UsbId::new(VID, 0x6014);
    pub const FT231X: UsbId = UsbId::new(VID, 0x6015);

    pub const ALL_PIDS: &[u16] = &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015];
}

/// Silicon Labs CP210x
pub mod cp210x {
    use super::UsbId;

    pub const VID: u16 = 0x10C4;

    pub const CP2102: UsbId = UsbId::new(VID, 0xEA60);
    pub const CP2105: UsbId = UsbId::new(VID, 0xEA70);
    pub const CP2108: UsbId = UsbId::new(VID, 0xEA71);

    pub const ALL_PIDS: &[u16] = &[0xEA60, 0xEA70, 0xEA71];
}

/// WCH CH340/CH341
pub mod ch34x {
    use super::UsbId;

    pub const VID: u16 = 0x1A86;

    pub const CH340: UsbId = UsbId::new(VID, 0x7523);
    pub const CH341: UsbId = UsbId::new(VID, 0x5523);
    pub const CH9102: UsbId = UsbId::new(VID, 0x55D4);

    pub const ALL_PIDS: &[u16] = &[0x7523, 0x5523, 0x55D4];
}

/// Prolific PL2303
pub mod prolific {
    use super::UsbId;

    pub const VID: u16 = 0x067B;

    pub const PL2303: UsbId = UsbId::new(VID, 0x2303);
    pub const PL2303GC: UsbId = UsbId::new(VID, 0x23A3);

    pub const ALL_PIDS: &[u16] = &[0x2303, 0x23A3];
}

/// Boards that enumerate as CDC-ACM
pub mod cdc_acm {
    use super::UsbId;

    pub const ARDUINO_VID: u16 = 0x2341;
    pub const RASPBERRY_PI_VID: u16 = 0x2E8A;
    pub const ESPRESSIF_VID: u16 = 0x303A;
    pub const STM_VID: u16 = 0x0483;

    pub const ARDUINO_UNO: UsbId = UsbId::new(ARDUINO_VID, 0x0043);
    pub const PICO_SDK: UsbId = UsbId::new(RASPBERRY_PI_VID, 0x000A);
    pub const ESP32_JTAG_SERIAL: UsbId = UsbId::new(ESPRESSIF_VID, 0x1001);
    pub const STM32_VCP: UsbId = UsbId::new(STM_VID, 0x5740);

    pub const ALL_VIDS: &[u16] = &[ARDUINO_VID, RASPBERRY_PI_VID, ESPRESSIF_VID];
}

/// Driver family for a USB serial device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Ftdi,
    Cp210x,
    Ch34x,
    Prolific,
    CdcAcm,
}

impl DriverKind {
    /// Returns a human-readable chip family name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ftdi => "FTDI",
            Self::Cp210x => "CP210x",
            Self::Ch34x => "CH34x",
            Self::Prolific => "PL2303",
            Self::CdcAcm => "CDC-ACM",
        }
    }
}

/// Look up the driver family for a VID/PID
pub fn driver_for(vid: u16, pid: u16) -> Option<DriverKind> {
    match vid {
        ftdi::VID if ftdi::ALL_PIDS.contains(&pid) => Some(DriverKind::Ftdi),
        cp210x::VID if cp210x::ALL_PIDS.contains(&pid) => Some(DriverKind::Cp210x),
        ch34x::VID if ch34x::ALL_PIDS.contains(&pid) => Some(DriverKind::Ch34x),
        prolific::VID if prolific::ALL_PIDS.contains(&pid) => Some(DriverKind::Prolific),
        cdc_acm::STM_VID if pid == cdc_acm::STM32_VCP.pid => Some(DriverKind::CdcAcm),
        v if cdc_acm::ALL_VIDS.contains(&v) => Some(DriverKind::CdcAcm),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_chips() {
        assert_eq!(
            driver_for(ftdi::FT232R.vid, ftdi::FT232R.pid),
            Some(DriverKind::Ftdi)
        );
        assert_eq!(
            driver_for(cp210x::CP2102.vid, cp210x::CP2102.pid),
            Some(DriverKind::Cp210x)
        );
        assert_eq!(
            driver_for(ch34x::CH340.vid, ch34x::CH340.pid),
            Some(DriverKind::Ch34x)
        );
        assert_eq!(
            driver_for(cdc_acm::PICO_SDK.vid, cdc_acm::PICO_SDK.pid),
            Some(DriverKind::CdcAcm)
        );
        assert_eq!(DriverKind::Prolific.name(), "PL2303");
    }

    #[test]
    fn test_unknown_ids() {
        // FTDI vendor with an unlisted product
        assert_eq!(driver_for(ftdi::VID, 0x1234), None);
        // STM vendor, but not the VCP product
        assert_eq!(driver_for(cdc_acm::STM_VID, 0x3748), None);
        assert_eq!(driver_for(0xFFFF, 0xFFFF), None);
    }
}

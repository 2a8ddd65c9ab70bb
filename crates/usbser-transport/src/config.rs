//! Serial line configuration
//!
//! [`SerialConfig`] is the validated line setup handed to the transport.
//! [`SerialSettings`] is the loose option bag a host bridge passes in, where
//! every field is optional and parity may arrive either as a name or as the
//! numeric code used by Android USB serial drivers.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Lowest accepted baud rate
pub const MIN_BAUD_RATE: u32 = 50;
/// Highest accepted baud rate
pub const MAX_BAUD_RATE: u32 = 4_000_000;
/// Baud rate used when none is given
pub const DEFAULT_BAUD_RATE: u32 = 9600;
/// Write timeout used when none is given
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2000;

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = ConfigError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(ConfigError::DataBits(other)),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Number of stop bits
///
/// Android drivers also know 1.5 stop bits (code 3); the desktop driver
/// cannot produce it, so it is rejected at conversion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = ConfigError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(ConfigError::StopBits(other)),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    /// Parse a parity name (`none`, `odd`, `even`; case-insensitive)
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            "mark" | "space" => Err(ConfigError::Parity(format!(
                "{} is not supported by the serial driver",
                name.trim()
            ))),
            _ => Err(ConfigError::Parity(name.to_string())),
        }
    }

    /// Parse an Android driver parity code (0=none, 1=odd, 2=even, 3=mark, 4=space)
    pub fn from_code(code: u8) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Odd),
            2 => Ok(Self::Even),
            3 => Self::from_name("mark"),
            4 => Self::from_name("space"),
            other => Err(ConfigError::Parity(format!("code {}", other))),
        }
    }

    /// Single-letter form used in line summaries (`8N1`)
    pub fn letter(&self) -> char {
        match self {
            Self::None => 'N',
            Self::Odd => 'O',
            Self::Even => 'E',
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Validated serial line configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate in bits per second
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Parity mode
    pub parity: Parity,
    /// Flow control mode
    pub flow_control: FlowControl,
    /// Assert DTR after opening
    pub dtr: bool,
    /// Assert RTS after opening
    pub rts: bool,
    /// Maximum time a single write may take
    pub write_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            dtr: true,
            rts: true,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl SerialConfig {
    /// 8N1 at the given baud rate
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Check every field against the driver's supported ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_BAUD_RATE..=MAX_BAUD_RATE).contains(&self.baud_rate) {
            return Err(ConfigError::BaudRate(self.baud_rate));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::WriteTimeout);
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            u8::from(self.data_bits),
            self.parity.letter(),
            u8::from(self.stop_bits)
        )
    }
}

/// Parity as received from a host: a name or a driver code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParitySetting {
    Code(u8),
    Name(String),
}

impl ParitySetting {
    pub fn resolve(&self) -> Result<Parity, ConfigError> {
        match self {
            Self::Code(code) => Parity::from_code(*code),
            Self::Name(name) => Parity::from_name(name),
        }
    }
}

/// Loose connection options as a host bridge supplies them
///
/// Missing fields fall back to the [`SerialConfig`] defaults (9600 8N1,
/// DTR/RTS asserted).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SerialSettings {
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<u8>,
    pub parity: Option<ParitySetting>,
    pub flow_control: Option<FlowControl>,
    pub dtr: Option<bool>,
    pub rts: Option<bool>,
    pub write_timeout_ms: Option<u64>,
}

impl SerialSettings {
    /// Resolve into a validated [`SerialConfig`]
    pub fn to_config(&self) -> Result<SerialConfig, ConfigError> {
        let defaults = SerialConfig::default();
        let config = SerialConfig {
            baud_rate: self.baud_rate.unwrap_or(defaults.baud_rate),
            data_bits: match self.data_bits {
                Some(bits) => DataBits::try_from(bits)?,
                None => defaults.data_bits,
            },
            stop_bits: match self.stop_bits {
                Some(bits) => StopBits::try_from(bits)?,
                None => defaults.stop_bits,
            },
            parity: match &self.parity {
                Some(parity) => parity.resolve()?,
                None => defaults.parity,
            },
            flow_control: self.flow_control.unwrap_or(defaults.flow_control),
            dtr: self.dtr.unwrap_or(defaults.dtr),
            rts: self.rts.unwrap_or(defaults.rts),
            write_timeout_ms: self.write_timeout_ms.unwrap_or(defaults.write_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }
}

//! Persistent CLI settings

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use usbser_session::{SessionOptions, DEFAULT_READ_WINDOW};
use usbser_sim::{DeviceBehavior, VirtualDeviceConfig};
use usbser_transport::SerialSettings;

/// Bytes appended to each line sent from the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    None,
    #[default]
    Lf,
    Cr,
    CrLf,
}

impl LineEnding {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::None => b"",
            Self::Lf => b"\n",
            Self::Cr => b"\r",
            Self::CrLf => b"\r\n",
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Line settings used unless overridden on the command line
    pub serial: SerialSettings,
    /// Framing, timeouts and buffer size for every session
    pub session: SessionOptions,
    /// How long `send` waits for a reply
    pub read_window_ms: u64,
    /// Print received data as hex instead of text
    pub show_hex: bool,
    pub line_ending: LineEnding,
    /// Devices offered by `--simulate`
    pub virtual_devices: Vec<VirtualDeviceConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            session: SessionOptions::default(),
            read_window_ms: DEFAULT_READ_WINDOW.as_millis() as u64,
            show_hex: false,
            line_ending: LineEnding::default(),
            virtual_devices: vec![
                VirtualDeviceConfig {
                    path: "/dev/ttySIM0".to_string(),
                    behavior: DeviceBehavior::Echo,
                },
                VirtualDeviceConfig {
                    path: "/dev/ttySIM1".to_string(),
                    behavior: DeviceBehavior::LineReply {
                        reply: b"OK\r\n".to_vec(),
                    },
                },
            ],
        }
    }
}

impl Settings {
    /// Get the XDG config directory for usbser
    /// Uses $XDG_CONFIG_HOME/usbser on Linux/macOS, falls back to ~/.config/usbser
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("usbser"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("usbser"))
    }

    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };
        let Ok(json) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match serde_json::from_str(&json) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring unreadable settings in {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save settings to disk, returning where they went
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::settings_path().context("could not determine settings path")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("failed to serialize settings")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;

        Ok(path)
    }
}

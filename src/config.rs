//! Configuration management
//!
//! Config file is `config.toml` next to the executable unless `--config`
//! names another path. A missing file means defaults; an unreadable or
//! invalid file is reported and replaced by defaults. Settings changed over
//! the SLCAN protocol are never written back.

use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_UDP_PORT};
use crate::error::{BridgeError, Result};
use crate::slcan::{Bitrate, DeviceInfo};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// =============================================================================
// Application Configuration
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub can: CanConfig,
    pub device: DeviceConfig,
}

// =============================================================================
// Host Transport Configuration
// =============================================================================

/// Host-facing byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Serial line (USB CDC gadget, UART). Reconnects after disconnect.
    #[default]
    Serial,
    /// UDP datagrams; replies go to the last peer
    Udp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Transport type for the host side
    pub transport: TransportKind,

    /// Serial port name (empty = first USB serial port)
    pub serial_port: String,

    /// Serial baud rate, ignored by USB CDC
    pub baud_rate: u32,

    /// UDP listen port
    pub udp_port: u16,

    /// UDP listen address
    pub udp_bind: IpAddr,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Serial,
            serial_port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            udp_port: DEFAULT_UDP_PORT,
            udp_bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

// =============================================================================
// CAN Configuration
// =============================================================================

/// CAN driver backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// In-process bus
    #[default]
    Virtual,
    /// Linux SocketCAN interface
    #[value(name = "socketcan")]
    SocketCan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanConfig {
    pub driver: DriverKind,

    /// SocketCAN interface name
    pub interface: String,

    /// Run `ip link` to apply bitrate and bring the interface up on open
    pub configure_link: bool,

    /// Bitrate selector (0-8) applied at startup; the host still sends `O`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_bitrate: Option<u8>,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::Virtual,
            interface: "can0".to_string(),
            configure_link: false,
            default_bitrate: None,
        }
    }
}

impl CanConfig {
    /// Startup bitrate, if configured
    pub fn startup_bitrate(&self) -> Result<Option<Bitrate>> {
        let Some(index) = self.default_bitrate else {
            return Ok(None);
        };
        index
            .checked_add(b'0')
            .and_then(Bitrate::lookup)
            .map(Some)
            .ok_or_else(|| BridgeError::ConfigValidation {
                field: "can.default_bitrate",
                reason: format!("expected a selector 0-8, got {}", index),
            })
    }
}

// =============================================================================
// Device Identification
// =============================================================================

/// Strings reported by the `V`, `v` and `N` commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub hardware_version: String,
    pub firmware_version: String,
    /// Exactly 4 alphanumeric characters
    pub serial_number: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let info = DeviceInfo::default();
        Self {
            hardware_version: info.hardware_version,
            firmware_version: info.firmware_version,
            serial_number: info.serial_number,
        }
    }
}

impl DeviceConfig {
    pub fn to_device_info(&self) -> DeviceInfo {
        DeviceInfo {
            hardware_version: self.hardware_version.clone(),
            firmware_version: self.firmware_version.clone(),
            serial_number: self.serial_number.clone(),
        }
    }
}

impl Config {
    /// Check values serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.can.startup_bitrate()?;

        let serial = &self.device.serial_number;
        if serial.len() != 4 || !serial.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(BridgeError::ConfigValidation {
                field: "device.serial_number",
                reason: format!("expected 4 alphanumeric characters, got {:?}", serial),
            });
        }

        for (field, value) in [
            ("device.hardware_version", &self.device.hardware_version),
            ("device.firmware_version", &self.device.firmware_version),
        ] {
            if value.bytes().any(|b| b == b'\r' || b == b'\x07') {
                return Err(BridgeError::ConfigValidation {
                    field,
                    reason: "must not contain line terminators".into(),
                });
            }
        }

        Ok(())
    }

    /// Pretty TOML, as printed by `check-config`
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::ConfigValidation {
            field: "config",
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Get the config file path
///
/// `explicit` wins; otherwise `config.toml` next to the executable.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let exe = std::env::current_exe().map_err(|e| BridgeError::ConfigRead {
        path: PathBuf::from("executable"),
        source: e,
    })?;
    let exe_dir = exe.parent().ok_or_else(|| BridgeError::ConfigValidation {
        field: "exe_path",
        reason: "no parent directory".into(),
    })?;
    Ok(exe_dir.join("config.toml"))
}

/// Load config, falling back to defaults on any problem
pub fn load(explicit: Option<&Path>) -> Config {
    match config_path(explicit) {
        Ok(path) => load_from(&path),
        Err(e) => {
            warn!("Failed to determine config path: {}, using defaults", e);
            Config::default()
        }
    }
}

/// Load config from `path`, falling back to defaults on any problem
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        debug!("No config at {:?}, using defaults", path);
        return Config::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Config parse error in {:?}: {}, using defaults", path, e);
                Config::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config {:?}: {}, using defaults", path, e);
            Config::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

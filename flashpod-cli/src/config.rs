//! Configuration file support for flashpod.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (FLASHPOD_*)
//! 3. Local config file (./flashpod.toml)
//! 4. Global config file (~/.config/flashpod/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("flashpod.toml")) {
            debug!("Loaded local config from flashpod.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "flashpod").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        self.usb_device.extend(other.usb_device);
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        // Don't add duplicates
        if self.usb_device.contains(&device) {
            return Ok(());
        }
        self.usb_device.push(device);

        let Some(global_dir) = Self::global_config_dir() else {
            anyhow::bail!("no configuration directory available");
        };
        fs::create_dir_all(&global_dir)?;
        let path = global_dir.join("config.toml");

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved device configuration to {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x16C0,
            pid: 0x0483,
        };
        assert!(device.matches(0x16C0, 0x0483));
        assert!(!device.matches(0x16C0, 0x5740));
    }

    #[test]
    fn test_parse_config() {
        let content = r#"
            [connection]
            serial = "/dev/ttyACM0"
            baud = 500000

            [[usb_device]]
            vid = 0x16C0
            pid = 0x0483
        "#;
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.baud, Some(500_000));
        assert_eq!(config.usb_device.len(), 1);
    }

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(config.usb_device.is_empty());
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base: Config = toml::from_str(
            r#"
            [connection]
            serial = "/dev/ttyACM0"
        "#,
        )
        .unwrap();
        let overlay: Config = toml::from_str(
            r#"
            [connection]
            serial = "COM7"
            baud = 115200
        "#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.connection.serial.as_deref(), Some("COM7"));
        assert_eq!(base.connection.baud, Some(115_200));
    }

    #[test]
    fn test_load_from_file_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "not = [valid").unwrap();
        assert!(Config::load_from_file(&path).is_none());
    }

    #[test]
    fn test_load_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyACM1".to_string());
        config.usb_device.push(UsbDevice {
            vid: 0x0483,
            pid: 0x5740,
        });
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.connection.serial.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(loaded.usb_device, config.usb_device);
    }
}

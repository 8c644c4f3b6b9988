//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default pause between characteristic writes.
pub const DEFAULT_WRITE_DELAY_MS: u64 = 100;

/// Default scan duration.
pub const DEFAULT_SCAN_TIMEOUT: u64 = 10;

/// Default wait for the device to confirm a configuration.
pub const DEFAULT_STATUS_TIMEOUT: u64 = 15;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Default device identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Scan duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_timeout: Option<u64>,

    /// Seconds to wait for `config_success`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_timeout: Option<u64>,

    /// Milliseconds between characteristic writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_delay_ms: Option<u64>,

    /// Last successfully provisioned device (auto-updated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_device: Option<String>,

    /// Name of the last provisioned device (for display)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_device_name: Option<String>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("timecube")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, or return default if missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn scan_timeout(&self, explicit: Option<u64>) -> Duration {
        Duration::from_secs(
            explicit
                .or(self.scan_timeout)
                .unwrap_or(DEFAULT_SCAN_TIMEOUT),
        )
    }

    pub fn status_timeout(&self, explicit: Option<u64>) -> Duration {
        Duration::from_secs(
            explicit
                .or(self.status_timeout)
                .unwrap_or(DEFAULT_STATUS_TIMEOUT),
        )
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms.unwrap_or(DEFAULT_WRITE_DELAY_MS))
    }
}

/// Resolve device from arg (or env var), then config default, then last device.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device
        .filter(|d| !d.trim().is_empty())
        .or_else(|| config.device.clone())
        .or_else(|| config.last_device.clone())
}

/// Record the last provisioned device.
pub fn update_last_device(identity: &str, name: Option<&str>) -> Result<()> {
    let mut config = Config::load();
    config.last_device = Some(identity.to_string());
    config.last_device_name = name.map(|n| n.to_string());
    config.save()
}

//! Configuration and settings management for BelugaKit
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in the platform config directory.
//!
//! Configuration is organized into logical sections:
//! - Channel settings (controller address, reconnect policy)
//! - Command settings (reply timeouts per command class)
//! - Run settings (duration calibration, step names, tick interval)

use belugakit_communication::{endpoint_url, ChannelConfig, CommandTimeouts};
use belugakit_run::{RunCalibration, OVERHEAD_SECONDS, PER_SAMPLE_SECONDS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, SettingsError, SettingsResult};

/// Environment variable overriding the controller address
pub const URL_ENV_VAR: &str = "BELUGAKIT_URL";

/// Directory name under the platform config dir
const APP_DIR: &str = "belugakit";

/// Controller channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Controller base URL
    pub base_url: String,
    /// Reconnect attempts before giving up
    pub reconnect_attempts: u32,
    /// Delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            base_url: belugakit_communication::DEFAULT_BASE_URL.to_string(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 20_000,
        }
    }
}

impl ChannelSettings {
    /// Channel client configuration for these settings
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(self.base_url.clone())
            .with_reconnect(
                self.reconnect_attempts,
                Duration::from_millis(self.reconnect_delay_ms),
            )
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
    }
}

/// Command reply timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Device toggles and quick queries, in milliseconds
    pub device_timeout_ms: u64,
    /// Network operations and run start, in milliseconds
    pub network_timeout_ms: u64,
    /// Whole barcode scan, in milliseconds
    pub scan_timeout_ms: u64,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            device_timeout_ms: 10_000,
            network_timeout_ms: 30_000,
            scan_timeout_ms: 600_000,
        }
    }
}

impl CommandSettings {
    /// Timeouts for the device control facade
    pub fn command_timeouts(&self) -> CommandTimeouts {
        CommandTimeouts {
            device: Duration::from_millis(self.device_timeout_ms),
            network: Duration::from_millis(self.network_timeout_ms),
        }
    }

    /// Budget for a whole scan
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

/// Run countdown settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Fixed seconds per run
    pub overhead_seconds: f64,
    /// Seconds added per sample
    pub per_sample_seconds: f64,
    /// Protocol step names in order
    pub step_names: Vec<String>,
    /// Countdown tick in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            overhead_seconds: OVERHEAD_SECONDS,
            per_sample_seconds: PER_SAMPLE_SECONDS,
            step_names: RunCalibration::default().step_names,
            tick_interval_ms: 1000,
        }
    }
}

impl RunSettings {
    /// Duration model for these settings
    pub fn calibration(&self) -> RunCalibration {
        RunCalibration {
            overhead_seconds: self.overhead_seconds,
            per_sample_seconds: self.per_sample_seconds,
            step_names: self.step_names.clone(),
        }
    }

    /// Countdown tick period
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// File format, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )
            .into()),
        }
    }
}

/// Complete console configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Controller channel
    pub channel: ChannelSettings,
    /// Command timeouts
    pub commands: CommandSettings,
    /// Run countdown
    pub run: RunSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location
    pub fn default_path() -> SettingsResult<PathBuf> {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| ConfigError::UnsupportedPlatform(std::env::consts::OS.to_string()))?;
        Ok(base.join(APP_DIR).join("config.toml"))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Load `path`, or the default location when `None`
    ///
    /// A missing file yields the defaults; a broken one is an error.
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::debug!("No settings at {}; using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Override the controller address
    pub fn apply_url_override(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            tracing::debug!("Controller URL overridden to {}", url);
            self.channel.base_url = url;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        // Validate channel settings
        endpoint_url(&self.channel.base_url)
            .map_err(|e| SettingsError::invalid("channel.base_url", e.to_string()))?;

        if self.channel.connect_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "channel.connect_timeout_ms",
                "must be > 0",
            ));
        }

        // Validate command timeouts
        let timeouts = [
            ("commands.device_timeout_ms", self.commands.device_timeout_ms),
            ("commands.network_timeout_ms", self.commands.network_timeout_ms),
            ("commands.scan_timeout_ms", self.commands.scan_timeout_ms),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(SettingsError::invalid(key, "must be > 0"));
            }
        }

        // Validate run settings
        self.run
            .calibration()
            .validate()
            .map_err(|e| SettingsError::invalid("run", e.to_string()))?;

        if self.run.tick_interval_ms == 0 {
            return Err(SettingsError::invalid("run.tick_interval_ms", "must be > 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.channel.base_url, "http://localhost:8000");
        assert_eq!(config.channel.reconnect_attempts, 5);
        assert_eq!(config.commands.scan_timeout(), Duration::from_secs(600));
        assert_eq!(config.run.step_names.len(), 5);
        assert_eq!(config.run.per_sample_seconds, 105.9375);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::new();
        config.channel.base_url = "http://beluga.local:8000".to_string();
        config.commands.device_timeout_ms = 5_000;
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "channel": { "base_url": "https://beluga.lab" } }"#).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.channel.base_url, "https://beluga.lab");
        assert_eq!(loaded.channel.connect_timeout_ms, 20_000);
        assert_eq!(loaded.commands, CommandSettings::default());
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "channel: {}").unwrap();

        assert!(matches!(
            Config::load_from_file(&path),
            Err(SettingsError::Config(ConfigError::UnsupportedFormat(_)))
        ));
        assert!(Config::new().save_to_file(&path).is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_or_default(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::new();
        config.channel.base_url = "ftp://beluga".to_string();
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { key, .. }) if key == "channel.base_url"
        ));

        let mut config = Config::new();
        config.commands.network_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new();
        config.run.step_names.clear();
        assert!(config.validate().is_err());

        let mut config = Config::new();
        config.run.overhead_seconds = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_override() {
        let mut config = Config::new();
        config.apply_url_override(Some("  ".to_string()));
        assert_eq!(config.channel.base_url, "http://localhost:8000");

        config.apply_url_override(Some("http://10.0.0.5:8000".to_string()));
        assert_eq!(config.channel.base_url, "http://10.0.0.5:8000");
        assert_eq!(
            config.channel.channel_config().base_url,
            "http://10.0.0.5:8000"
        );
    }
}

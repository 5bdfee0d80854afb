//! BelugaKit Settings Crate
//!
//! Handles console configuration: loading, validation and saving.

pub mod config;
pub mod error;

pub use config::{ChannelSettings, CommandSettings, Config, RunSettings, URL_ENV_VAR};
pub use error::{ConfigError, SettingsError, SettingsResult};

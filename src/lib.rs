//! # BelugaKit
//!
//! Operator console side of the Beluga liquid-handling instrument's control
//! channel.
//!
//! ## Architecture
//!
//! BelugaKit is organized as a workspace with multiple crates:
//!
//! 1. **belugakit-core** - Errors, connection state, event bus, shared type aliases
//! 2. **belugakit-communication** - Wire codec, transports, channel client,
//!    command correlation, device control, barcode scan sessions
//! 3. **belugakit-run** - Run duration model and the pausable countdown
//! 4. **belugakit-settings** - Configuration loading, validation and saving
//! 5. **belugakit** - This crate: the assembled [`Console`] and the operator CLI

use std::sync::Arc;

pub use belugakit_communication::{
    ChannelClient, ChannelConfig, CommandSpec, Correlator, DeviceController, RunRequest,
    RunStarted, ScanCompletion, ScanProgress, ScanResult, ScanSession, ToggleDevice, Transport,
    WifiNetwork, WifiStatus,
};
pub use belugakit_core::{
    ChannelEvent, CommandError, ConnectionError, ConnectionState, Error, EventBus, Result,
};
pub use belugakit_run::{
    RunParameters, RunResult, RunSnapshot, RunState, RunTimer, RunTimerDriver,
};
pub use belugakit_settings::{Config, SettingsError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    // Logs go to stderr so command output on stdout stays clean
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// The console's view of one instrument
///
/// Owns the channel client and the facades built on it, all sharing the
/// same connection and event bus.
#[derive(Clone)]
pub struct Console {
    config: Config,
    channel: ChannelClient,
    devices: DeviceController,
    scan: ScanSession,
}

impl Console {
    /// Console talking to the configured controller over WebSocket
    pub fn new(config: Config) -> Self {
        let channel = ChannelClient::websocket(config.channel.channel_config());
        Self::assemble(config, channel)
    }

    /// Console over a custom transport
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let channel = ChannelClient::new(config.channel.channel_config(), transport);
        Self::assemble(config, channel)
    }

    fn assemble(config: Config, channel: ChannelClient) -> Self {
        let devices =
            DeviceController::with_timeouts(channel.clone(), config.commands.command_timeouts());
        let scan = ScanSession::with_timeout(channel.clone(), config.commands.scan_timeout());
        Self {
            config,
            channel,
            devices,
            scan,
        }
    }

    /// Connect and wait for the controller to accept the session
    pub async fn connect(&self) -> Result<()> {
        self.channel.connect()?;
        self.channel
            .wait_connected(self.channel.config().connect_timeout)
            .await?;
        tracing::info!("Console connected to {}", self.config.channel.base_url);
        Ok(())
    }

    /// Close the channel
    pub fn shutdown(&self) {
        self.channel.disconnect();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channel(&self) -> &ChannelClient {
        &self.channel
    }

    pub fn devices(&self) -> &DeviceController {
        &self.devices
    }

    pub fn scan(&self) -> &ScanSession {
        &self.scan
    }

    /// Countdown for a run of `samples`, not yet started
    pub fn run_timer(&self, samples: &str) -> RunResult<RunTimer> {
        let params = RunParameters::from_sample_field(samples, &self.config.run.calibration())?;
        Ok(RunTimer::new(params))
    }

    /// Start the countdown for a run of `samples` at the configured tick
    pub fn spawn_run_timer(&self, samples: &str) -> RunResult<RunTimerDriver> {
        RunTimerDriver::spawn(self.run_timer(samples)?, self.config.run.tick_interval())
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("base_url", &self.config.channel.base_url)
            .field("state", &self.channel.state())
            .finish()
    }
}

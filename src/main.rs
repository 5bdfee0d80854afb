use anyhow::Context;
use belugakit::{
    init_logging, Config, Console, RunRequest, RunState, ScanProgress, ToggleDevice, BUILD_DATE,
    VERSION,
};
use belugakit_core::DataCallback;
use belugakit_settings::URL_ENV_VAR;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "belugakit", version, about = "Beluga operator console")]
struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Controller base URL
    #[arg(long, value_name = "URL", env = URL_ENV_VAR)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Switch the UV lamp
    Uv { state: Switch },
    /// Switch the system light
    Light { state: Switch },
    /// Switch the filter fan
    Filter { state: Switch },
    /// Send a generic device control command
    Device {
        name: String,
        number: u32,
        state: String,
    },
    /// Initialize the hardware
    Init,
    /// Start an extraction run
    StartRun {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        samples: u32,
        #[arg(long)]
        operator: Option<String>,
    },
    /// Ask the controller to stop a run
    StopRun { run_id: String },
    /// Wi-Fi management
    Wifi {
        #[command(subcommand)]
        action: WifiAction,
    },
    /// Scan the sample rack barcodes
    Scan,
    /// Print every channel event until interrupted
    Monitor,
    /// Run the countdown for a run locally
    Timer {
        #[arg(long)]
        samples: String,
    },
}

#[derive(Subcommand, Debug)]
enum WifiAction {
    Status,
    Scan,
    Known,
    Connect {
        ssid: String,
        #[arg(long)]
        password: Option<String>,
    },
    Disconnect,
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;
    tracing::debug!("belugakit {} (built {})", VERSION, BUILD_DATE);

    let mut config =
        Config::load_or_default(cli.config.as_deref()).context("loading configuration")?;
    config.apply_url_override(cli.url);
    config.validate()?;

    let console = Console::new(config);

    // The countdown needs no controller
    if !matches!(cli.command, Command::Timer { .. }) {
        console
            .connect()
            .await
            .with_context(|| format!("connecting to {}", console.config().channel.base_url))?;
    }
    let outcome = execute(&console, cli.command).await;
    console.shutdown();
    outcome
}

async fn execute(console: &Console, command: Command) -> anyhow::Result<()> {
    let devices = console.devices();
    match command {
        Command::Uv { state } => toggle(console, ToggleDevice::UvLight, state).await,
        Command::Light { state } => toggle(console, ToggleDevice::SystemLight, state).await,
        Command::Filter { state } => toggle(console, ToggleDevice::Filter, state).await,
        Command::Device {
            name,
            number,
            state,
        } => print_json(&devices.control_device(&name, number, &state).await?),
        Command::Init => print_json(&devices.initialize_hardware().await?),
        Command::StartRun {
            run_id,
            samples,
            operator,
        } => {
            let request = RunRequest {
                run_id,
                operator_name: operator.unwrap_or_default(),
                number_of_samples: samples,
                ..RunRequest::default()
            };
            let started = devices.start_run(&request).await?;
            println!("Run {} started", started.run_id);
            Ok(())
        }
        Command::StopRun { run_id } => {
            devices.stop_run(&run_id)?;
            println!("Stop requested for run {}", run_id);
            Ok(())
        }
        Command::Wifi { action } => wifi(console, action).await,
        Command::Scan => scan(console).await,
        Command::Monitor => monitor(console).await,
        Command::Timer { samples } => run_timer(console, &samples).await,
    }
}

async fn toggle(console: &Console, device: ToggleDevice, state: Switch) -> anyhow::Result<()> {
    let reply = console.devices().set_toggle(device, state.is_on()).await?;
    print_json(&reply)
}

async fn wifi(console: &Console, action: WifiAction) -> anyhow::Result<()> {
    let devices = console.devices();
    match action {
        WifiAction::Status => print_json(&devices.wifi_status().await?),
        WifiAction::Scan => print_json(&devices.scan_wifi_networks().await?),
        WifiAction::Known => print_json(&devices.known_networks().await?),
        WifiAction::Connect { ssid, password } => {
            print_json(&devices.connect_wifi(&ssid, password.as_deref()).await?)
        }
        WifiAction::Disconnect => print_json(&devices.disconnect_wifi().await?),
    }
}

async fn scan(console: &Console) -> anyhow::Result<()> {
    let on_progress: DataCallback<ScanProgress> = Box::new(|progress| match progress {
        ScanProgress::Counts(counts) => println!(
            "scanned {} ({} samples, {} empty, {} remaining)",
            counts.mapped_slots, counts.sample_count, counts.empty_count, counts.remaining
        ),
        ScanProgress::Slots(slots) => {
            for slot in slots {
                println!(
                    "slot {:>3}: {}",
                    slot.slot,
                    slot.barcode.as_deref().unwrap_or("-")
                );
            }
        }
    });

    let scan = console.scan().start(json!({}), Some(on_progress));
    let result = tokio::select! {
        result = scan => result?,
        _ = tokio::signal::ctrl_c() => {
            console.scan().request_stop()?;
            anyhow::bail!("scan interrupted");
        }
    };

    println!("Scan {:?} with {} slots", result.completion, result.slots.len());
    print_json(&result.slots)
}

async fn monitor(console: &Console) -> anyhow::Result<()> {
    let mut events = console.channel().events();
    console.devices().request_system_status()?;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{}", event.description()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Monitor lagged; {} events dropped", missed);
                }
                Err(_) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn run_timer(console: &Console, samples: &str) -> anyhow::Result<()> {
    let driver = console.spawn_run_timer(samples)?;
    let mut updates = driver.subscribe();
    let steps = console.config().run.step_names.len();

    loop {
        let snapshot = updates.borrow_and_update().clone();
        println!(
            "{} {} step {}/{} {} ({}% step, {}% overall)",
            snapshot.state,
            snapshot.remaining_display(),
            snapshot.current_step_index + 1,
            steps,
            snapshot.current_step,
            snapshot.step_progress_percent,
            snapshot.overall_progress_percent
        );
        if snapshot.state.is_terminal() {
            break;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                driver.abort();
            }
        }
    }

    let last = driver.finished().await;
    if last.state == RunState::Aborted {
        println!("Run aborted with {} remaining", last.remaining_display());
    }
    Ok(())
}

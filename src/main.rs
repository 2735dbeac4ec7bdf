//! # Sensor Telemetry Agent
//!
//! Publishes BME280 measurements with device metadata to an MQTT broker.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first argument, default `config/default.toml`)
//!    - Set up logging
//!    - Open the board devices
//!
//! 2. **Run**
//!    - `continuous`: connect once, publish every interval, feed the watchdog
//!    - `duty_cycled`: connect, publish once, shut the radio down
//!
//! 3. **Terminal action**
//!    - Deep sleep or error wait, then a full reset
//!
//! The process never returns normally: every path ends in a reset. Ctrl+C
//! is the only way out.
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- config/default.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use sensor_telemetry::agent::{settle, ContinuousAgent, DutyCycledAgent, TerminalAction};
use sensor_telemetry::board::LinuxBoard;
use sensor_telemetry::clock::SystemClock;
use sensor_telemetry::config::{Config, DeviceMode};
use sensor_telemetry::hal::power::{PowerControl, ProcessPower};
use sensor_telemetry::logging;

/// Default configuration path
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Publishes BME280 measurements with device metadata to an MQTT broker
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

async fn run_agent(config: &Config, clock: Arc<SystemClock>) -> Result<TerminalAction> {
    let board = LinuxBoard::new(config, clock);
    let settings = board.settings()?;
    let platform = board.platform().context("Failed to open board devices")?;

    let action = match config.device.mode {
        DeviceMode::Continuous => ContinuousAgent::new(platform, settings).run().await,
        DeviceMode::DutyCycled => DutyCycledAgent::new(platform, settings).run().await,
    };
    Ok(action)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    let _log_guard = logging::init(&config.logging);
    info!("Sensor Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Mode: {:?}", config.device.mode);

    let clock = Arc::new(SystemClock::new());
    let power = ProcessPower::new();

    let action = tokio::select! {
        result = run_agent(&config, clock.clone()) => match result {
            Ok(action) => action,
            Err(e) => {
                // Board setup failed; treat like any other failure of the run
                error!("Error in main loop: {:#}", e);
                TerminalAction::Reset {
                    after: std::time::Duration::from_secs(config.device.error_sleep_s),
                }
            }
        },

        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            return Ok(());
        }
    };

    tokio::select! {
        result = settle(action, &power, clock.as_ref()) => {
            if let Err(e) = result {
                error!("Failed to settle before reset: {}", e);
            }
        }

        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            return Ok(());
        }
    }

    power.reset()
}

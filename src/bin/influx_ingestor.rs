//! Forwards telemetry messages into InfluxDB and logs them.
//!
//! ```bash
//! cargo run --bin influx-ingestor -- config/collector.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use sensor_telemetry::broker::rumqtt::RumqttConnector;
use sensor_telemetry::broker::BrokerConnector;
use sensor_telemetry::collector::influx::{InfluxForwarder, InfluxWriter};
use sensor_telemetry::collector::{DeviceDirectory, LogHandler, Receiver};
use sensor_telemetry::config::CollectorConfig;
use sensor_telemetry::logging;

const DEFAULT_CONFIG_PATH: &str = "config/collector.toml";

/// Forwards telemetry messages into InfluxDB
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = CollectorConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    let influx = config
        .influx
        .as_ref()
        .context("The [influx] section is required by the ingestor")?;

    let _log_guard = logging::init(&config.logging);
    info!("Application started");

    let directory = DeviceDirectory::new(config.devices.clone());
    info!("{} known device(s)", directory.len());
    let forwarder = InfluxForwarder::new(
        directory,
        Box::new(InfluxWriter::new(influx)),
        &influx.measurement,
    );

    let settings = config.mqtt.session_settings();
    info!(
        "Connecting to '{}' as client '{}' (user '{}') to listen topic '{}'",
        settings.host,
        settings.client_id,
        settings.username.as_deref().unwrap_or("-"),
        config.subscription.topic
    );
    let client = RumqttConnector::new().connect(&settings).await?;

    Receiver::new(client, &config.subscription.topic)
        .with_handler(Box::new(forwarder))
        .with_handler(Box::new(LogHandler))
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

//! Configuration of the host-side collectors.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{default_topic, invalid, validate_logging, LoggingConfig, MqttConfig};
use crate::error::Result;

/// Host-side collector configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub subscription: SubscriptionConfig,

    #[serde(default)]
    pub influx: Option<InfluxConfig>,

    /// Machine unique id → device name
    #[serde(default)]
    pub devices: BTreeMap<String, String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Topic the collectors listen to
#[derive(Debug, Deserialize, Clone)]
pub struct SubscriptionConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
}

/// InfluxDB v2 write configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InfluxConfig {
    pub url: String,

    pub token: String,

    pub org: String,

    pub bucket: String,

    #[serde(default = "default_influx_measurement")]
    pub measurement: String,
}

fn default_influx_measurement() -> String { "PicoWData".to_string() }

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { topic: default_topic() }
    }
}

impl CollectorConfig {
    /// Load collector configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: CollectorConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.mqtt.validate()?;

        if self.subscription.topic.is_empty() {
            return Err(invalid("subscription topic cannot be empty"));
        }

        if let Some(influx) = &self.influx {
            for (name, value) in [
                ("url", &influx.url),
                ("token", &influx.token),
                ("org", &influx.org),
                ("bucket", &influx.bucket),
                ("measurement", &influx.measurement),
            ] {
                if value.is_empty() {
                    return Err(invalid(format!("influx {} cannot be empty", name)));
                }
            }

            if !influx.url.starts_with("http://") && !influx.url.starts_with("https://") {
                return Err(invalid("influx url must start with http:// or https://"));
            }
        }

        validate_logging(&self.logging)
    }
}

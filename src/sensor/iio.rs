//! # BME280 via Linux IIO
//!
//! The kernel `bmp280` driver exposes the BME280 under
//! `/sys/bus/iio/devices/iio:deviceN/`:
//!
//! | File | Unit |
//! |------|------|
//! | `in_temp_input` | m°C |
//! | `in_pressure_input` | kPa |
//! | `in_humidityrelative_input` | m%RH |

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{EnvironmentSensor, Measurement};
use crate::error::{Result, TelemetryError};

const TEMPERATURE_FILE: &str = "in_temp_input";
const PRESSURE_FILE: &str = "in_pressure_input";
const HUMIDITY_FILE: &str = "in_humidityrelative_input";

/// BME280 read through the IIO sysfs interface
#[derive(Debug, Clone)]
pub struct Bme280Iio {
    device_dir: PathBuf,
}

impl Bme280Iio {
    pub fn new<P: AsRef<Path>>(device_dir: P) -> Self {
        Self {
            device_dir: device_dir.as_ref().to_path_buf(),
        }
    }

    async fn read_channel(&self, file: &str) -> Result<f64> {
        let path = self.device_dir.join(file);
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            TelemetryError::Sensor(format!("Failed to read {}: {}", path.display(), e))
        })?;
        contents.trim().parse().map_err(|e| {
            TelemetryError::Sensor(format!(
                "Invalid value '{}' in {}: {}",
                contents.trim(),
                path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl EnvironmentSensor for Bme280Iio {
    async fn read(&self) -> Result<Measurement> {
        let temperature = self.read_channel(TEMPERATURE_FILE).await? / 1000.0;
        let pressure = self.read_channel(PRESSURE_FILE).await? * 10.0;
        let humidity = self.read_channel(HUMIDITY_FILE).await? / 1000.0;

        debug!(
            "BME280: {:.2} °C, {:.2} hPa, {:.2} %RH",
            temperature, pressure, humidity
        );

        Ok(Measurement {
            temperature,
            pressure,
            humidity,
        })
    }
}

//! # Sensor Module
//!
//! Environmental measurements (temperature, pressure, humidity).

pub mod iio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One atomic reading of the environmental sensor.
///
/// Captured once, consumed by a single send step, then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Temperature in °C
    pub temperature: f64,
    /// Pressure in hPa
    pub pressure: f64,
    /// Relative humidity in %RH
    pub humidity: f64,
}

/// Trait for an environmental sensor
#[async_trait]
pub trait EnvironmentSensor: Send + Sync {
    /// Takes one measurement.
    async fn read(&self) -> Result<Measurement>;
}

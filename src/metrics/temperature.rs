//! # CPU Temperature
//!
//! The internal sensor is a diode on an ADC channel. Its voltage maps to
//! temperature with the transfer function
//!
//! `T = 27 - (V - 0.706) / 0.001721` (°C)
//!
//! where `V = raw × 3.3 / 65535`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TelemetryError};
use crate::hal::adc::{AdcChannel, ADC_FULL_SCALE, ADC_REFERENCE_VOLTAGE};

/// ADC channel wired to the internal temperature sensor on the RP2040.
pub const INTERNAL_SENSOR_CHANNEL: u8 = 4;

/// Sensor voltage at 27 °C.
const SENSOR_VOLTAGE_AT_27C: f64 = 0.706;

/// Sensor slope in volts per °C.
const SENSOR_SLOPE: f64 = 0.001721;

/// Trait for reading the CPU temperature
#[cfg_attr(test, mockall::automock)]
pub trait CpuTemperature: Send + Sync {
    /// Current temperature in °C.
    fn current_temperature(&self) -> Result<f64>;
}

/// Converts a sensor voltage to °C.
///
/// # Examples
///
/// ```
/// use sensor_telemetry::metrics::temperature::voltage_to_celsius;
///
/// assert!((voltage_to_celsius(0.706) - 27.0).abs() < 1e-9);
/// ```
pub fn voltage_to_celsius(voltage: f64) -> f64 {
    27.0 - (voltage - SENSOR_VOLTAGE_AT_27C) / SENSOR_SLOPE
}

/// Internal temperature sensor read through an ADC channel.
pub struct InternalTemperatureSensor {
    adc: Box<dyn AdcChannel>,
}

impl InternalTemperatureSensor {
    pub fn new(adc: Box<dyn AdcChannel>) -> Self {
        Self { adc }
    }
}

impl CpuTemperature for InternalTemperatureSensor {
    fn current_temperature(&self) -> Result<f64> {
        let reading = self.adc.read_u16()? as f64 * ADC_REFERENCE_VOLTAGE / ADC_FULL_SCALE;
        Ok(voltage_to_celsius(reading))
    }
}

/// Linux thermal zone reporting millidegrees Celsius
/// (e.g. `/sys/class/thermal/thermal_zone0/temp`).
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CpuTemperature for ThermalZone {
    fn current_temperature(&self) -> Result<f64> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            TelemetryError::Hardware(format!(
                "Failed to read thermal zone {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let millidegrees: f64 = contents.trim().parse().map_err(|e| {
            TelemetryError::Hardware(format!("Invalid thermal zone value '{}': {}", contents.trim(), e))
        })?;
        Ok(millidegrees / 1000.0)
    }
}

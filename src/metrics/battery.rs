//! # Battery Monitor
//!
//! Battery voltage is measured on the VSYS rail through a 3:1 divider:
//!
//! `V = raw × 3 × 3.3 / 65535`
//!
//! The charge estimate interpolates linearly between the empty and full
//! reference voltages and is clamped at 100 %. Readings below the empty
//! voltage are not clamped and yield negative percentages.
//!
//! On boards where the ADC shares a line with the radio, an optional
//! control line is held low for the duration of the read.

use tracing::debug;

use crate::error::Result;
use crate::hal::adc::{AdcChannel, ADC_FULL_SCALE, ADC_REFERENCE_VOLTAGE};
use crate::hal::gpio::{LowGuard, OutputPin};
use crate::payload::PowerMetrics;

/// Converts a 16-bit VSYS reading to volts (3-cell divider).
pub const CONVERSION_FACTOR: f64 = 3.0 * ADC_REFERENCE_VOLTAGE / ADC_FULL_SCALE;

/// Full battery voltage (volts)
pub const FULL_BATTERY_VOLTAGE: f64 = 4.2;

/// Empty battery voltage (volts)
pub const EMPTY_BATTERY_VOLTAGE: f64 = 2.8;

/// Charge estimate for `voltage` between `empty` and `full`, capped at 100.
pub fn charge_percentage(voltage: f64, empty: f64, full: f64) -> f64 {
    let percentage = 100.0 * (voltage - empty) / (full - empty);
    percentage.min(100.0)
}

/// Battery voltage and charge reader
pub struct BatteryMonitor {
    adc: Box<dyn AdcChannel>,
    control: Option<Box<dyn OutputPin>>,
    empty_voltage: f64,
    full_voltage: f64,
}

impl BatteryMonitor {
    /// Creates a monitor with the default 2.8 V / 4.2 V references.
    pub fn new(adc: Box<dyn AdcChannel>) -> Self {
        Self {
            adc,
            control: None,
            empty_voltage: EMPTY_BATTERY_VOLTAGE,
            full_voltage: FULL_BATTERY_VOLTAGE,
        }
    }

    /// Holds `pin` low while the ADC is read.
    #[must_use]
    pub fn with_control_pin(mut self, pin: Box<dyn OutputPin>) -> Self {
        self.control = Some(pin);
        self
    }

    /// Overrides the empty/full reference voltages.
    #[must_use]
    pub fn with_thresholds(mut self, empty_voltage: f64, full_voltage: f64) -> Self {
        self.empty_voltage = empty_voltage;
        self.full_voltage = full_voltage;
        self
    }

    /// Reads the battery voltage fresh from the ADC.
    pub fn current_voltage(&self) -> Result<f64> {
        let _guard = match self.control.as_deref() {
            Some(pin) => Some(LowGuard::engage(pin)?),
            None => None,
        };
        let raw = self.adc.read_u16()?;
        debug!("VSYS raw reading: {}", raw);
        Ok(raw as f64 * CONVERSION_FACTOR)
    }

    /// Charge estimate for an already measured voltage.
    pub fn calculate_percentage(&self, voltage: f64) -> f64 {
        charge_percentage(voltage, self.empty_voltage, self.full_voltage)
    }

    /// Reads the voltage and derives the charge estimate from it.
    pub fn charge_percentage(&self) -> Result<f64> {
        Ok(self.calculate_percentage(self.current_voltage()?))
    }

    /// One voltage reading with its charge estimate.
    pub fn snapshot(&self) -> Result<PowerMetrics> {
        let current_voltage = self.current_voltage()?;
        Ok(PowerMetrics {
            current_voltage,
            charge_percentage: self.calculate_percentage(current_voltage),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::hal::adc::mocks::MockAdc;
    use crate::hal::gpio::mocks::MockPin;

    fn monitor() -> BatteryMonitor {
        BatteryMonitor::new(Box::new(MockAdc::new(0)))
    }

    #[test]
    fn test_full_voltage_is_100_percent() {
        assert_eq!(monitor().calculate_percentage(4.2), 100.0);
    }

    #[test]
    fn test_midpoint_is_50_percent() {
        let mid = (FULL_BATTERY_VOLTAGE + EMPTY_BATTERY_VOLTAGE) / 2.0;
        assert!((monitor().calculate_percentage(mid) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_above_full_is_clamped() {
        assert_eq!(monitor().calculate_percentage(5.0), 100.0);
        assert_eq!(monitor().calculate_percentage(4.21), 100.0);
    }

    #[test]
    fn test_below_empty_is_not_clamped() {
        // Current behaviour: only the upper bound is clamped
        let percentage = monitor().calculate_percentage(2.1);
        assert!((percentage - -50.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentage_is_monotonic() {
        let battery = monitor();
        let mut previous = f64::NEG_INFINITY;
        for step in 0..=60 {
            let voltage = 2.0 + step as f64 * 0.05;
            let percentage = battery.calculate_percentage(voltage);
            assert!(percentage >= previous, "not monotonic at {} V", voltage);
            previous = percentage;
        }
    }

    #[test]
    fn test_voltage_conversion() {
        let battery = BatteryMonitor::new(Box::new(MockAdc::new(65535)));
        assert!((battery.current_voltage().unwrap() - 9.9).abs() < 1e-9);
    }

    #[test]
    fn test_control_pin_held_low_during_read() {
        let pin = MockPin::new();
        let battery = BatteryMonitor::new(Box::new(MockAdc::new(27_000)))
            .with_control_pin(Box::new(pin.clone()));

        battery.current_voltage().unwrap();

        assert_eq!(pin.history(), vec![false, true]);
    }

    #[test]
    fn test_control_pin_restored_when_read_fails() {
        let pin = MockPin::new();
        let battery =
            BatteryMonitor::new(Box::new(MockAdc::failing())).with_control_pin(Box::new(pin.clone()));

        assert!(matches!(
            battery.current_voltage(),
            Err(TelemetryError::Hardware(_))
        ));
        assert_eq!(pin.history(), vec![false, true]);
    }

    #[test]
    fn test_snapshot_uses_single_reading() {
        let adc = MockAdc::new(27_000);
        let battery = BatteryMonitor::new(Box::new(adc.clone()));

        let power = battery.snapshot().unwrap();

        assert_eq!(adc.reads(), 1);
        assert!((power.current_voltage - 27_000.0 * CONVERSION_FACTOR).abs() < 1e-9);
        assert_eq!(
            power.charge_percentage,
            battery.calculate_percentage(power.current_voltage)
        );
    }

    #[test]
    fn test_custom_thresholds() {
        let battery = monitor().with_thresholds(3.0, 4.0);
        assert!((battery.calculate_percentage(3.5) - 50.0).abs() < 1e-9);
    }
}

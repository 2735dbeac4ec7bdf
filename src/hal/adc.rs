//! Analog-to-digital converter channels.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TelemetryError};

/// Full-scale value of a 16-bit normalized ADC reading.
pub const ADC_FULL_SCALE: f64 = 65535.0;

/// ADC reference voltage in volts.
pub const ADC_REFERENCE_VOLTAGE: f64 = 3.3;

/// Trait for reading an analog channel
pub trait AdcChannel: Send + Sync {
    /// Reads the channel, normalized to the 0..=65535 range.
    fn read_u16(&self) -> Result<u16>;
}

/// Scales a raw reading of `bits` resolution to 16 bits.
///
/// The low bits are filled by repeating the high bits, so full scale maps
/// to exactly 65535.
pub fn scale_to_u16(raw: u32, bits: u8) -> u16 {
    let bits = bits.clamp(1, 16) as u32;
    let max = (1u32 << bits) - 1;
    let raw = raw.min(max);
    if bits == 16 {
        return raw as u16;
    }

    let mut value = raw << (16 - bits);
    let mut filled = bits;
    while filled < 16 {
        value |= value >> filled;
        filled *= 2;
    }
    value as u16
}

/// ADC channel exposed through the Linux IIO sysfs interface
/// (e.g. `/sys/bus/iio/devices/iio:device0/in_voltage0_raw`).
#[derive(Debug, Clone)]
pub struct SysfsAdc {
    path: PathBuf,
    resolution_bits: u8,
}

impl SysfsAdc {
    /// Creates a channel reader for `path` with the converter's resolution.
    ///
    /// # Errors
    ///
    /// Returns `Hardware` if `resolution_bits` is not between 1 and 16.
    pub fn new<P: AsRef<Path>>(path: P, resolution_bits: u8) -> Result<Self> {
        if !(1..=16).contains(&resolution_bits) {
            return Err(TelemetryError::Hardware(format!(
                "ADC resolution must be between 1 and 16 bits, got {}",
                resolution_bits
            )));
        }

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            resolution_bits,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AdcChannel for SysfsAdc {
    fn read_u16(&self) -> Result<u16> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            TelemetryError::Hardware(format!("Failed to read ADC {}: {}", self.path.display(), e))
        })?;
        let raw: u32 = contents.trim().parse().map_err(|e| {
            TelemetryError::Hardware(format!(
                "Invalid ADC value '{}' in {}: {}",
                contents.trim(),
                self.path.display(),
                e
            ))
        })?;
        Ok(scale_to_u16(raw, self.resolution_bits))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_scale_12_bit_full_scale() {
        assert_eq!(scale_to_u16(4095, 12), 65535);
        assert_eq!(scale_to_u16(0, 12), 0);
    }

    #[test]
    fn test_scale_12_bit_matches_read_u16() {
        // read_u16 on 12-bit converters: (raw << 4) | (raw >> 8)
        let raw = 0x0ABC;
        assert_eq!(scale_to_u16(raw, 12), ((raw << 4) | (raw >> 8)) as u16);
    }

    #[test]
    fn test_scale_clamps_out_of_range() {
        assert_eq!(scale_to_u16(70_000, 16), 65535);
        assert_eq!(scale_to_u16(5000, 12), 65535);
    }

    #[test]
    fn test_invalid_resolution_rejected() {
        assert!(SysfsAdc::new("/tmp/adc", 0).is_err());
        assert!(SysfsAdc::new("/tmp/adc", 17).is_err());
        assert!(SysfsAdc::new("/tmp/adc", 12).is_ok());
    }

    #[test]
    fn test_sysfs_adc_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "4095").unwrap();

        let adc = SysfsAdc::new(file.path(), 12).unwrap();
        assert_eq!(adc.read_u16().unwrap(), 65535);
    }

    #[test]
    fn test_sysfs_adc_rejects_garbage() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not-a-number").unwrap();

        let adc = SysfsAdc::new(file.path(), 12).unwrap();
        match adc.read_u16() {
            Err(TelemetryError::Hardware(msg)) => assert!(msg.contains("Invalid ADC value")),
            other => panic!("Expected Hardware error, got: {:?}", other),
        }
    }

    #[test]
    fn test_sysfs_adc_missing_file() {
        let adc = SysfsAdc::new("/nonexistent/in_voltage0_raw", 12).unwrap();
        assert!(adc.read_u16().is_err());
    }
}

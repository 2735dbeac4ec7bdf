//! Digital output lines: status LED, peripheral control and power-down pins.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::clock::Clock;
use crate::error::{Result, TelemetryError};

/// Trait for a digital output line
pub trait OutputPin: Send + Sync {
    /// Drives the line high.
    fn set_high(&self) -> Result<()>;

    /// Drives the line low.
    fn set_low(&self) -> Result<()>;

    /// Inverts the current level.
    fn toggle(&self) -> Result<()>;
}

/// Output line backed by a sysfs value file.
///
/// Works for `/sys/class/gpio/gpioN/value` as well as
/// `/sys/class/leds/<name>/brightness`.
#[derive(Debug)]
pub struct SysfsPin {
    path: PathBuf,
    level: AtomicBool,
}

impl SysfsPin {
    /// Creates a pin handle; the level is assumed low until first written.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            level: AtomicBool::new(false),
        }
    }

    fn write(&self, high: bool) -> Result<()> {
        fs::write(&self.path, if high { "1" } else { "0" }).map_err(|e| {
            TelemetryError::Hardware(format!(
                "Failed to write GPIO {}: {}",
                self.path.display(),
                e
            ))
        })?;
        self.level.store(high, Ordering::SeqCst);
        Ok(())
    }
}

impl OutputPin for SysfsPin {
    fn set_high(&self) -> Result<()> {
        self.write(true)
    }

    fn set_low(&self) -> Result<()> {
        self.write(false)
    }

    fn toggle(&self) -> Result<()> {
        self.write(!self.level.load(Ordering::SeqCst))
    }
}

/// Holds a line low for as long as the guard lives.
///
/// The line is driven high again when the guard is dropped, on every exit
/// path of the enclosing scope.
pub struct LowGuard<'a> {
    pin: &'a dyn OutputPin,
}

impl<'a> LowGuard<'a> {
    /// Drives `pin` low and returns the guard restoring it.
    pub fn engage(pin: &'a dyn OutputPin) -> Result<Self> {
        pin.set_low()?;
        Ok(Self { pin })
    }
}

impl Drop for LowGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pin.set_high() {
            warn!("Failed to restore control line: {}", e);
        }
    }
}

/// Greeting sequence shown on the status LED at boot.
pub const HELLO_SEQUENCE: [bool; 9] = [false, true, false, true, false, true, false, true, false];

/// Step duration of [`HELLO_SEQUENCE`].
pub const HELLO_STEP: Duration = Duration::from_millis(100);

/// Blinks the boot greeting on `led`.
pub async fn blink_hello(led: &dyn OutputPin, clock: &dyn Clock) -> Result<()> {
    for high in HELLO_SEQUENCE {
        if high {
            led.set_high()?;
        } else {
            led.set_low()?;
        }
        clock.sleep(HELLO_STEP).await;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::mocks::MockPin;
    use super::*;
    use crate::clock::mocks::ManualClock;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sysfs_pin_writes_levels() {
        let file = NamedTempFile::new().unwrap();
        let pin = SysfsPin::new(file.path());

        pin.set_high().unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "1");

        pin.toggle().unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "0");

        pin.toggle().unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "1");
    }

    #[test]
    fn test_sysfs_pin_missing_path() {
        let pin = SysfsPin::new("/nonexistent/gpio/value");
        assert!(matches!(pin.set_low(), Err(TelemetryError::Hardware(_))));
    }

    #[test]
    fn test_low_guard_restores_on_drop() {
        let pin = MockPin::new();
        {
            let _guard = LowGuard::engage(&pin).unwrap();
            assert_eq!(pin.level(), Some(false));
        }
        assert_eq!(pin.history(), vec![false, true]);
    }

    #[test]
    fn test_low_guard_restores_on_early_return() {
        fn read_with_guard(pin: &MockPin) -> Result<u16> {
            let _guard = LowGuard::engage(pin)?;
            Err(TelemetryError::Hardware("read failed".to_string()))
        }

        let pin = MockPin::new();
        assert!(read_with_guard(&pin).is_err());
        assert_eq!(pin.level(), Some(true));
    }

    #[tokio::test]
    async fn test_hello_sequence_ends_low() {
        let pin = MockPin::new();
        let clock = ManualClock::new();
        blink_hello(&pin, &clock).await.unwrap();
        assert_eq!(pin.history(), HELLO_SEQUENCE.to_vec());
        assert_eq!(clock.total_slept(), HELLO_STEP * 9);
        assert_eq!(pin.level(), Some(false));
    }

    #[tokio::test]
    async fn test_hello_stops_on_pin_failure() {
        let pin = MockPin::new();
        pin.set_fail(true);
        let clock = ManualClock::new();

        let result = blink_hello(&pin, &clock).await;

        assert!(matches!(result, Err(TelemetryError::Hardware(_))));
        assert!(pin.history().is_empty());
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }
}

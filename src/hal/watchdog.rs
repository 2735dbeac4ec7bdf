//! Hardware watchdog timer.
//!
//! Once started, the watchdog resets the board unless it is fed within its
//! timeout. The supervised loop feeds it every iteration.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TelemetryError};

/// Longest watchdog timeout the RP2040 supports (milliseconds).
pub const RP2040_MAX_WATCHDOG_MS: u64 = 8388;

/// `WDIOC_SETTIMEOUT` = `_IOWR('W', 6, int)`
const WDIOC_SETTIMEOUT: u64 = 0xC004_5706;

/// Trait for a hardware watchdog
pub trait Watchdog: Send {
    /// Arms the watchdog with `timeout`.
    fn start(&mut self, timeout: Duration) -> Result<()>;

    /// Resets the watchdog countdown.
    fn feed(&mut self) -> Result<()>;
}

/// Linux watchdog device (e.g. `/dev/watchdog`).
///
/// Opening the device arms it; each write feeds it. The device is never
/// closed with the magic character, so a crashed process still triggers a
/// reset.
#[derive(Debug)]
pub struct DevWatchdog {
    path: PathBuf,
    device: Option<File>,
}

impl DevWatchdog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            device: None,
        }
    }

    fn set_timeout(device: &File, timeout: Duration) -> Result<()> {
        let mut secs: libc::c_int = timeout.as_secs().max(1).min(i32::MAX as u64) as libc::c_int;
        // SAFETY: the fd is owned by `device` and `secs` outlives the call
        let rc = unsafe { libc::ioctl(device.as_raw_fd(), WDIOC_SETTIMEOUT as _, &mut secs) };
        if rc < 0 {
            return Err(TelemetryError::Hardware(format!(
                "Failed to set watchdog timeout: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

impl Watchdog for DevWatchdog {
    fn start(&mut self, timeout: Duration) -> Result<()> {
        let device = OpenOptions::new().write(true).open(&self.path).map_err(|e| {
            TelemetryError::Hardware(format!(
                "Failed to open watchdog {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Self::set_timeout(&device, timeout)?;
        info!("Watchdog {} armed with {:?} timeout", self.path.display(), timeout);
        self.device = Some(device);
        Ok(())
    }

    fn feed(&mut self) -> Result<()> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| TelemetryError::Hardware("Watchdog fed before start".to_string()))?;
        device
            .write_all(b"\0")
            .map_err(|e| TelemetryError::Hardware(format!("Failed to feed watchdog: {}", e)))
    }
}

/// Stand-in for boards without a watchdog device.
#[derive(Debug, Default)]
pub struct DisabledWatchdog;

impl Watchdog for DisabledWatchdog {
    fn start(&mut self, timeout: Duration) -> Result<()> {
        info!("No watchdog configured (requested timeout {:?})", timeout);
        Ok(())
    }

    fn feed(&mut self) -> Result<()> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_before_start_fails() {
        let mut watchdog = DevWatchdog::new("/nonexistent/watchdog");
        assert!(matches!(watchdog.feed(), Err(TelemetryError::Hardware(_))));
    }

    #[test]
    fn test_start_missing_device_fails() {
        let mut watchdog = DevWatchdog::new("/nonexistent/watchdog");
        match watchdog.start(Duration::from_secs(8)) {
            Err(TelemetryError::Hardware(msg)) => assert!(msg.contains("/nonexistent/watchdog")),
            other => panic!("Expected Hardware error, got: {:?}", other),
        }
    }

    #[test]
    fn test_disabled_watchdog_accepts_feeds() {
        let mut watchdog = DisabledWatchdog;
        watchdog.start(Duration::from_millis(RP2040_MAX_WATCHDOG_MS)).unwrap();
        watchdog.feed().unwrap();
    }
}

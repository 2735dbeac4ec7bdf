//! System resource metrics: free memory, free flash, CPU frequency, firmware version.

use std::ffi::CString;
use std::fs;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TelemetryError};

/// Firmware version reported in metadata.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Trait for reading system resource metrics
#[cfg_attr(test, mockall::automock)]
pub trait SystemStats: Send + Sync {
    /// Free memory in bytes.
    fn mem_free(&self) -> Result<u64>;

    /// Free space on the root filesystem in bytes.
    fn flash_free_bytes(&self) -> Result<u64>;

    /// Current CPU clock frequency in Hz.
    fn cpu_frequency_hz(&self) -> Result<u64>;

    /// Firmware/runtime version string.
    fn runtime_version(&self) -> String;
}

/// Extracts `MemAvailable` (falling back to `MemFree`) from `/proc/meminfo`
/// contents, in bytes.
pub fn parse_meminfo(contents: &str) -> Option<u64> {
    let field = |name: &str| {
        contents.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some(kib * 1024)
        })
    };
    field("MemAvailable").or_else(|| field("MemFree"))
}

/// System metrics read from procfs, sysfs and `statvfs`.
#[derive(Debug, Clone)]
pub struct LinuxSystemStats {
    meminfo_path: PathBuf,
    cpufreq_path: PathBuf,
    fs_root: PathBuf,
}

impl LinuxSystemStats {
    pub fn new() -> Self {
        Self {
            meminfo_path: PathBuf::from("/proc/meminfo"),
            cpufreq_path: PathBuf::from("/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq"),
            fs_root: PathBuf::from("/"),
        }
    }

    /// Overrides the filesystem whose free space is reported.
    #[must_use]
    pub fn with_fs_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.fs_root = root.as_ref().to_path_buf();
        self
    }

    fn read(path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| {
            TelemetryError::Hardware(format!("Failed to read {}: {}", path.display(), e))
        })
    }
}

impl Default for LinuxSystemStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStats for LinuxSystemStats {
    fn mem_free(&self) -> Result<u64> {
        let contents = Self::read(&self.meminfo_path)?;
        parse_meminfo(&contents).ok_or_else(|| {
            TelemetryError::Hardware("No MemAvailable/MemFree in meminfo".to_string())
        })
    }

    fn flash_free_bytes(&self) -> Result<u64> {
        let path = CString::new(self.fs_root.as_os_str().as_bytes()).map_err(|e| {
            TelemetryError::Hardware(format!("Invalid filesystem path: {}", e))
        })?;
        let mut stat = MaybeUninit::<libc::statvfs>::uninit();
        // SAFETY: `path` is NUL-terminated and `stat` is a valid out pointer
        let rc = unsafe { libc::statvfs(path.as_ptr(), stat.as_mut_ptr()) };
        if rc != 0 {
            return Err(TelemetryError::Hardware(format!(
                "statvfs({}) failed: {}",
                self.fs_root.display(),
                std::io::Error::last_os_error()
            )));
        }
        // SAFETY: statvfs returned success, so the struct is initialized
        let stat = unsafe { stat.assume_init() };
        Ok(stat.f_frsize as u64 * stat.f_bavail as u64)
    }

    fn cpu_frequency_hz(&self) -> Result<u64> {
        let contents = Self::read(&self.cpufreq_path)?;
        let khz: u64 = contents.trim().parse().map_err(|e| {
            TelemetryError::Hardware(format!("Invalid CPU frequency '{}': {}", contents.trim(), e))
        })?;
        Ok(khz * 1000)
    }

    fn runtime_version(&self) -> String {
        FIRMWARE_VERSION.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:        3884096 kB\n\
                           MemFree:          201340 kB\n\
                           MemAvailable:    2563712 kB\n\
                           Buffers:          118860 kB\n";

    #[test]
    fn test_parse_meminfo_prefers_available() {
        assert_eq!(parse_meminfo(MEMINFO), Some(2_563_712 * 1024));
    }

    #[test]
    fn test_parse_meminfo_falls_back_to_free() {
        let old_kernel = "MemTotal: 1000 kB\nMemFree: 500 kB\n";
        assert_eq!(parse_meminfo(old_kernel), Some(500 * 1024));
    }

    #[test]
    fn test_parse_meminfo_missing_fields() {
        assert_eq!(parse_meminfo("Buffers: 12 kB\n"), None);
    }

    #[test]
    fn test_flash_free_on_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let stats = LinuxSystemStats::new().with_fs_root(dir.path());
        assert!(stats.flash_free_bytes().unwrap() > 0);
    }

    #[test]
    fn test_flash_free_missing_path() {
        let stats = LinuxSystemStats::new().with_fs_root("/nonexistent/mount");
        assert!(matches!(
            stats.flash_free_bytes(),
            Err(TelemetryError::Hardware(_))
        ));
    }

    #[test]
    fn test_runtime_version_is_package_version() {
        assert_eq!(LinuxSystemStats::new().runtime_version(), env!("CARGO_PKG_VERSION"));
    }
}

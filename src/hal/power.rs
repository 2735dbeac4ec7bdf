//! Deep sleep and full device reset.

use async_trait::async_trait;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Duration;
use tracing::{error, info};

use crate::error::Result;

/// Exit code used when the process image cannot be re-executed; the
/// service manager is expected to restart the agent.
pub const RESET_EXIT_CODE: i32 = 75;

/// Trait for the board's power controller
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Enters the lowest-power state for `duration`.
    async fn deep_sleep(&self, duration: Duration) -> Result<()>;

    /// Restarts the device from boot. Never returns.
    fn reset(&self) -> !;
}

/// Power control for a Linux process acting as the device firmware.
///
/// Deep sleep idles the process; reset replaces the process image with a
/// fresh copy of itself, so the agent boots from scratch with no retained
/// state.
#[derive(Debug, Default)]
pub struct ProcessPower;

impl ProcessPower {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PowerControl for ProcessPower {
    async fn deep_sleep(&self, duration: Duration) -> Result<()> {
        info!("Entering deep sleep for {:?}", duration);
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn reset(&self) -> ! {
        info!("Resetting device");
        let mut args = std::env::args_os();
        if let (Ok(exe), Some(_)) = (std::env::current_exe(), args.next()) {
            // Only returns on failure
            let err = Command::new(exe).args(args).exec();
            error!("Failed to re-execute agent: {}", err);
        }
        std::process::exit(RESET_EXIT_CODE);
    }
}

//! Uptime counter.

use std::sync::Arc;

use crate::clock::{ticks_elapsed, Clock, Ticks};

/// Milliseconds elapsed since the counter was created.
///
/// Uses wrapping tick arithmetic, so the result stays correct when the
/// monotonic counter overflows between start and query.
pub struct UptimeCounter {
    clock: Arc<dyn Clock>,
    start: Ticks,
}

impl UptimeCounter {
    /// Captures the current tick as the start point.
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        let start = clock.ticks_ms();
        Self { clock, start }
    }

    pub fn uptime_ms(&self) -> u32 {
        ticks_elapsed(self.clock.ticks_ms(), self.start)
    }
}

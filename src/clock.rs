//! # Clock Module
//!
//! Monotonic tick counter, real-time clock and sleeping.
//!
//! Ticks are a wrapping millisecond counter. They are only ever compared
//! through [`ticks_elapsed`], which stays correct across a counter wrap as
//! long as the measured interval is shorter than the counter period.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Monotonic millisecond tick value (wraps at `u32::MAX`).
pub type Ticks = u32;

/// Timestamp format used in payload metadata (second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Elapsed milliseconds between two tick readings, tolerating wraparound.
///
/// # Examples
///
/// ```
/// use sensor_telemetry::clock::ticks_elapsed;
///
/// assert_eq!(ticks_elapsed(1500, 500), 1000);
/// // Counter wrapped between the two readings
/// assert_eq!(ticks_elapsed(99, u32::MAX - 100), 200);
/// ```
pub fn ticks_elapsed(end: Ticks, start: Ticks) -> u32 {
    end.wrapping_sub(start)
}

/// Renders an RTC reading the way payload metadata expects it.
pub fn format_timestamp(time: &NaiveDateTime) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Time source for the telemetry pipeline
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic tick count in milliseconds.
    fn ticks_ms(&self) -> Ticks;

    /// Current wall-clock time from the real-time clock.
    fn now(&self) -> NaiveDateTime;

    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Host clock: tokio monotonic time plus an adjustable UTC real-time clock.
///
/// The RTC starts out as the system time and can be corrected with
/// [`SystemClock::set_time`] (e.g. after an SNTP exchange).
#[derive(Debug)]
pub struct SystemClock {
    origin: tokio::time::Instant,
    rtc_offset_ms: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            rtc_offset_ms: AtomicI64::new(0),
        }
    }

    /// Sets the real-time clock to `time`.
    pub fn set_time(&self, time: DateTime<Utc>) {
        let offset = time.signed_duration_since(Utc::now()).num_milliseconds();
        self.rtc_offset_ms.store(offset, Ordering::Relaxed);
    }

    /// Current RTC correction relative to system time, in milliseconds.
    pub fn rtc_offset_ms(&self) -> i64 {
        self.rtc_offset_ms.load(Ordering::Relaxed)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn ticks_ms(&self) -> Ticks {
        // Truncation gives the wrapping behaviour of a hardware tick counter
        self.origin.elapsed().as_millis() as Ticks
    }

    fn now(&self) -> NaiveDateTime {
        let offset = ChronoDuration::milliseconds(self.rtc_offset_ms());
        (Utc::now() + offset).naive_utc()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::ManualClock;
    use super::*;

    #[test]
    fn test_ticks_elapsed_without_wrap() {
        assert_eq!(ticks_elapsed(10_000, 4_000), 6_000);
        assert_eq!(ticks_elapsed(7, 7), 0);
    }

    #[test]
    fn test_ticks_elapsed_across_wrap() {
        let start = u32::MAX - 499;
        let end = 500;
        assert_eq!(ticks_elapsed(end, start), 1_000);
    }

    #[test]
    fn test_timestamp_format() {
        let clock = ManualClock::new();
        assert_eq!(format_timestamp(&clock.now()), "2024-03-09 12:30:05");
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_ticks() {
        let clock = ManualClock::starting_at(u32::MAX - 999);
        clock.sleep(Duration::from_secs(2)).await;
        assert_eq!(clock.ticks_ms(), 1_000);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
        assert_eq!(format_timestamp(&clock.now()), "2024-03-09 12:30:07");
    }

    #[test]
    fn test_system_clock_rtc_offset() {
        let clock = SystemClock::new();
        let target = Utc::now() + ChronoDuration::hours(1);
        clock.set_time(target);
        let offset = clock.rtc_offset_ms();
        assert!((3_599_000..=3_601_000).contains(&offset), "offset was {}", offset);
    }

    #[tokio::test]
    async fn test_system_clock_ticks_progress() {
        let clock = SystemClock::new();
        let start = clock.ticks_ms();
        clock.sleep(Duration::from_millis(20)).await;
        assert!(ticks_elapsed(clock.ticks_ms(), start) >= 20);
    }
}

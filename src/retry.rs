//! # Retry Policy
//!
//! Bounded retry-with-backoff around a fallible async operation.
//!
//! A policy is validated when it is built, so invalid parameters are
//! reported before the protected operation ever runs. Executing a policy
//! keeps no state between calls.
//!
//! The sleep before attempt `i + 1` is `delay × backoff^(i-1)`; no sleep
//! follows the final attempt.
//!
//! ## Usage
//!
//! ```no_run
//! use sensor_telemetry::clock::SystemClock;
//! use sensor_telemetry::retry::RetryPolicy;
//!
//! # async fn example() -> sensor_telemetry::error::Result<()> {
//! let clock = SystemClock::new();
//! let policy = RetryPolicy::new(3, 5.0, 2.0)?;
//! let value = policy.run(&clock, || async { Ok(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{ErrorKind, Result, TelemetryError};

/// Retry-with-backoff parameters for one protected call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    backoff_factor: f64,
    retry_on: Option<Vec<ErrorKind>>,
}

impl RetryPolicy {
    /// Creates a validated retry policy.
    ///
    /// # Arguments
    ///
    /// * `attempts` - Maximum number of attempts (0 or greater)
    /// * `delay_secs` - Initial delay between attempts in seconds (greater than 0)
    /// * `backoff_factor` - Multiplier applied to the delay after each wait (1 or greater)
    ///
    /// # Errors
    ///
    /// Returns `InvalidRetryPolicy` if any parameter is out of range.
    pub fn new(attempts: i64, delay_secs: f64, backoff_factor: f64) -> Result<Self> {
        if !(backoff_factor >= 1.0) || !backoff_factor.is_finite() {
            return Err(TelemetryError::InvalidRetryPolicy(
                "the backoff factor must be greater or equal to 1".to_string(),
            ));
        }

        if attempts < 0 {
            return Err(TelemetryError::InvalidRetryPolicy(
                "the number of attempts must be 0 or greater".to_string(),
            ));
        }

        if !(delay_secs > 0.0) {
            return Err(TelemetryError::InvalidRetryPolicy(
                "the delay must be greater than 0".to_string(),
            ));
        }

        let attempts = u32::try_from(attempts).map_err(|_| {
            TelemetryError::InvalidRetryPolicy(format!("{} attempts is too many", attempts))
        })?;
        let delay = Duration::try_from_secs_f64(delay_secs)
            .map_err(|e| TelemetryError::InvalidRetryPolicy(format!("invalid delay: {}", e)))?;

        Ok(Self {
            attempts,
            delay,
            backoff_factor,
            retry_on: None,
        })
    }

    /// Single attempt, no retries.
    #[must_use]
    pub fn once() -> Self {
        Self {
            attempts: 1,
            delay: Duration::from_secs(1),
            backoff_factor: 1.0,
            retry_on: None,
        }
    }

    /// Restricts retries to errors of the given kinds.
    ///
    /// Errors of any other kind are propagated on first occurrence.
    #[must_use]
    pub fn retry_on(mut self, kinds: &[ErrorKind]) -> Self {
        self.retry_on = Some(kinds.to_vec());
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Sleep schedule between consecutive attempts (`attempts - 1` entries).
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let count = self.attempts.saturating_sub(1) as usize;
        std::iter::successors(Some(self.delay), move |d| Some(self.next_delay(*d))).take(count)
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_factor)
            .unwrap_or(Duration::MAX)
    }

    fn catches(&self, error: &TelemetryError) -> bool {
        match &self.retry_on {
            Some(kinds) => kinds.contains(&error.kind()),
            None => true,
        }
    }

    /// Runs `operation` under this policy.
    ///
    /// Returns the first successful result. The error of the final attempt
    /// is returned once attempts are exhausted; an error outside the
    /// allow-list is returned immediately.
    pub async fn run<C, F, Fut, T>(&self, clock: &C, mut operation: F) -> Result<T>
    where
        C: Clock + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut remaining = self.attempts;
        let mut delay = self.delay;

        while remaining > 0 {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            warn!("Exception when retrying: {}", error);
            if !self.catches(&error) {
                return Err(error);
            }

            remaining -= 1;
            if remaining == 0 {
                return Err(error);
            }

            debug!("{} attempt(s) left, next in {:?}", remaining, delay);
            clock.sleep(delay).await;
            delay = self.next_delay(delay);
        }

        Err(TelemetryError::NoAttempts)
    }
}

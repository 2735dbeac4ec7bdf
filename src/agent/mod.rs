//! # Agent Module
//!
//! Supervised run loops for the two firmware variants.
//!
//! This module handles:
//! - The state chain `BOOTING → CONNECTING_NETWORK → SYNC_CLOCK → CONNECTING_BROKER → RUNNING`
//! - Recovery by full reset (continuous) or deep sleep (duty-cycled)
//! - The platform a run loop is wired to
//!
//! Neither loop recovers in place. Any failure ends the run with a
//! [`TerminalAction`]; the binary performs it with [`settle`] and then
//! resets the device, so the next run starts again from `BOOTING`.

pub mod continuous;
pub mod duty_cycled;

pub use continuous::ContinuousAgent;
pub use duty_cycled::DutyCycledAgent;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::broker::{BrokerConnector, BrokerSettings};
use crate::clock::Clock;
use crate::error::Result;
use crate::hal::gpio::OutputPin;
use crate::hal::power::PowerControl;
use crate::hal::watchdog::Watchdog;
use crate::metrics::battery::BatteryMonitor;
use crate::metrics::system::SystemStats;
use crate::metrics::temperature::CpuTemperature;
use crate::network::{WifiSettings, WirelessInterface};
use crate::retry::RetryPolicy;
use crate::sensor::EnvironmentSensor;
use crate::timesync::ClockSync;

/// Upper bound on one idle slice of the continuous loop.
pub const MAX_LOOP_SLICE: Duration = Duration::from_secs(5);

/// Run-loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Booting,
    ConnectingNetwork,
    SyncClock,
    ConnectingBroker,
    Running,
    Sleeping,
    Resetting,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Booting => "BOOTING",
            AgentState::ConnectingNetwork => "CONNECTING_NETWORK",
            AgentState::SyncClock => "SYNC_CLOCK",
            AgentState::ConnectingBroker => "CONNECTING_BROKER",
            AgentState::Running => "RUNNING",
            AgentState::Sleeping => "SLEEPING",
            AgentState::Resetting => "RESETTING",
        };
        f.write_str(name)
    }
}

/// How a run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalAction {
    /// Deep sleep, then reset
    DeepSleep(Duration),
    /// Wait, then reset
    Reset { after: Duration },
}

/// Tracks and logs the current state of a run loop.
#[derive(Debug)]
pub struct Supervisor {
    state: AgentState,
    history: Vec<AgentState>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            state: AgentState::Booting,
            history: vec![AgentState::Booting],
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Every state entered so far, `BOOTING` first.
    pub fn history(&self) -> &[AgentState] {
        &self.history
    }

    pub fn transition(&mut self, next: AgentState) {
        info!("State: {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry policies for every protected operation of a run
#[derive(Debug, Clone)]
pub struct RetryBudgets {
    pub wifi: RetryPolicy,
    pub clock_sync: RetryPolicy,
    pub broker: RetryPolicy,
    pub sensor: RetryPolicy,
}

/// Run-loop parameters
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub wifi: WifiSettings,
    pub broker: BrokerSettings,
    pub topic: String,
    pub measurement_interval: Duration,
    /// Wait before reset (continuous) or sleep length (duty-cycled) after a failure
    pub error_sleep: Duration,
    pub watchdog_timeout: Duration,
    /// Pause between radio shutdown and deep sleep
    pub settle_delay: Duration,
    pub retry: RetryBudgets,
}

/// Hardware and services a run loop drives.
///
/// Providers shared with the enrichment step sit behind `Arc` so the
/// pipeline can be rebuilt on every boot without giving up the platform.
pub struct Platform<B: BrokerConnector> {
    pub clock: Arc<dyn Clock>,
    pub wireless: Box<dyn WirelessInterface>,
    pub connector: B,
    pub sensor: Arc<dyn EnvironmentSensor>,
    pub cpu_temperature: Arc<dyn CpuTemperature>,
    pub system: Arc<dyn SystemStats>,
    /// Colon-delimited hardware id
    pub machine_unique_id: String,
    pub status_led: Option<Box<dyn OutputPin>>,
    pub watchdog: Box<dyn Watchdog>,
    pub clock_sync: Option<Box<dyn ClockSync>>,
    pub battery: Option<BatteryMonitor>,
    /// Driven low right before deep sleep
    pub power_down_pins: Vec<Box<dyn OutputPin>>,
}

/// Idle slice of the continuous loop: never longer than the watchdog allows.
pub fn loop_slice(watchdog_timeout: Duration) -> Duration {
    MAX_LOOP_SLICE.min(watchdog_timeout)
}

/// Performs the wait part of a terminal action.
///
/// The caller resets the device afterwards.
///
/// # Errors
///
/// Returns the power controller's error if deep sleep cannot be entered.
pub async fn settle(
    action: TerminalAction,
    power: &dyn PowerControl,
    clock: &dyn Clock,
) -> Result<()> {
    match action {
        TerminalAction::DeepSleep(duration) => power.deep_sleep(duration).await,
        TerminalAction::Reset { after } => {
            info!("Resetting in {:?}", after);
            clock.sleep(after).await;
            Ok(())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::MockPower;
    use super::*;
    use crate::clock::mocks::ManualClock;

    #[test]
    fn test_supervisor_records_transitions() {
        let mut supervisor = Supervisor::new();
        assert_eq!(supervisor.state(), AgentState::Booting);

        supervisor.transition(AgentState::ConnectingNetwork);
        supervisor.transition(AgentState::Resetting);

        assert_eq!(supervisor.state(), AgentState::Resetting);
        assert_eq!(
            supervisor.history(),
            &[
                AgentState::Booting,
                AgentState::ConnectingNetwork,
                AgentState::Resetting
            ]
        );
    }

    #[test]
    fn test_state_names() {
        assert_eq!(AgentState::ConnectingNetwork.to_string(), "CONNECTING_NETWORK");
        assert_eq!(AgentState::SyncClock.to_string(), "SYNC_CLOCK");
    }

    #[test]
    fn test_loop_slice_bounded_by_watchdog() {
        assert_eq!(loop_slice(Duration::from_millis(8388)), Duration::from_secs(5));
        assert_eq!(loop_slice(Duration::from_millis(2000)), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_settle_deep_sleep_uses_power_controller() {
        let power = MockPower::default();
        let clock = ManualClock::new();

        settle(TerminalAction::DeepSleep(Duration::from_secs(600)), &power, &clock)
            .await
            .unwrap();

        assert_eq!(*power.sleeps.lock().unwrap(), vec![Duration::from_secs(600)]);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_settle_reset_waits_error_sleep() {
        let power = MockPower::default();
        let clock = ManualClock::new();

        settle(
            TerminalAction::Reset {
                after: Duration::from_secs(30),
            },
            &power,
            &clock,
        )
        .await
        .unwrap();

        assert!(power.sleeps.lock().unwrap().is_empty());
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
    }
}

//! Continuous-mode agent: one long-lived session, watchdog-fed cadence loop.

use std::convert::Infallible;
use tracing::{error, info};

use super::{loop_slice, AgentSettings, AgentState, Platform, Supervisor, TerminalAction};
use crate::broker::{connect_with_retry, BrokerConnector};
use crate::clock::{format_timestamp, ticks_elapsed, Clock, Ticks};
use crate::enrich::MetadataEnricher;
use crate::error::Result;
use crate::hal::gpio::{blink_hello, OutputPin};
use crate::network;
use crate::pipeline::MeasurementCycle;

/// Stays awake and publishes one measurement per interval.
///
/// The first measurement goes out as soon as the loop starts; after that a
/// measurement is due once `measurement_interval` has elapsed on the tick
/// counter. Between checks the loop idles for [`loop_slice`] and feeds the
/// watchdog, so a hung iteration resets the board.
pub struct ContinuousAgent<B: BrokerConnector> {
    platform: Platform<B>,
    settings: AgentSettings,
    supervisor: Supervisor,
}

impl<B: BrokerConnector> ContinuousAgent<B> {
    pub fn new(platform: Platform<B>, settings: AgentSettings) -> Self {
        Self {
            platform,
            settings,
            supervisor: Supervisor::new(),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Runs until the first unhandled error.
    ///
    /// # Returns
    ///
    /// * `TerminalAction::Reset` - always; the wait is the configured error sleep
    pub async fn run(&mut self) -> TerminalAction {
        let error = match self.run_until_failure().await {
            Ok(never) => match never {},
            Err(e) => e,
        };

        error!("Error in main loop: {}", error);
        self.supervisor.transition(AgentState::Resetting);
        TerminalAction::Reset {
            after: self.settings.error_sleep,
        }
    }

    async fn run_until_failure(&mut self) -> Result<Infallible> {
        let clock = self.platform.clock.clone();
        let clock_ref: &dyn Clock = clock.as_ref();
        let led: Option<&dyn OutputPin> = self.platform.status_led.as_deref();

        if let Some(led) = led {
            blink_hello(led, clock_ref).await?;
        }
        info!("Current timestamp is: {}", format_timestamp(&clock.now()));

        self.supervisor.transition(AgentState::ConnectingNetwork);
        let wireless = self.platform.wireless.as_ref();
        let wifi = &self.settings.wifi;
        let network = self
            .settings
            .retry
            .wifi
            .run(clock_ref, move || network::bring_up(wireless, clock_ref, wifi, led))
            .await?;
        if let Some(led) = led {
            led.set_high()?;
        }

        if let Some(clock_sync) = self.platform.clock_sync.as_deref() {
            self.supervisor.transition(AgentState::SyncClock);
            info!("Trying to setup current timestamp");
            self.settings
                .retry
                .clock_sync
                .run(clock_ref, move || clock_sync.sync())
                .await?;
        }

        self.supervisor.transition(AgentState::ConnectingBroker);
        let mut client = connect_with_retry(
            &self.platform.connector,
            &self.settings.broker,
            &self.settings.retry.broker,
            clock_ref,
        )
        .await?;

        let enricher = MetadataEnricher::new(
            network.mac_address.to_string().to_lowercase(),
            self.platform.machine_unique_id.clone(),
            clock.clone(),
            self.platform.cpu_temperature.clone(),
            self.platform.system.clone(),
        );
        let cycle = MeasurementCycle::new(
            self.platform.sensor.clone(),
            Box::new(enricher),
            self.settings.topic.clone(),
            self.settings.retry.sensor.clone(),
            clock.clone(),
        );

        self.supervisor.transition(AgentState::Running);
        let slice = loop_slice(self.settings.watchdog_timeout);
        let interval_ms = u32::try_from(self.settings.measurement_interval.as_millis())
            .unwrap_or(u32::MAX);
        self.platform.watchdog.start(self.settings.watchdog_timeout)?;

        let mut last_measurement: Option<Ticks> = None;
        loop {
            let now = clock.ticks_ms();
            let due = last_measurement.map_or(true, |last| ticks_elapsed(now, last) >= interval_ms);
            if due {
                cycle.run(&mut client).await?;
                last_measurement = Some(clock.ticks_ms());
            }

            clock.sleep(slice).await;
            self.platform.watchdog.feed()?;
        }
    }
}

//! Duty-cycled agent: one publish per wake-up, then deep sleep.

use tracing::{error, info};

use super::{AgentSettings, AgentState, Platform, Supervisor, TerminalAction};
use crate::broker::{connect_with_retry, BrokerClient, BrokerConnector};
use crate::clock::{format_timestamp, Clock};
use crate::enrich::MetadataEnricher;
use crate::error::Result;
use crate::metrics::uptime::UptimeCounter;
use crate::network;
use crate::pipeline::MeasurementCycle;

/// Battery-powered variant.
///
/// Every wake-up runs network → broker → measure → publish exactly once,
/// shuts the radio down and returns [`TerminalAction::DeepSleep`]. A
/// failure anywhere shortens the sleep to the error interval.
pub struct DutyCycledAgent<B: BrokerConnector> {
    platform: Platform<B>,
    settings: AgentSettings,
    supervisor: Supervisor,
}

impl<B: BrokerConnector> DutyCycledAgent<B> {
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

    /// Runs one wake-up cycle.
    ///
    /// # Returns
    ///
    /// * `TerminalAction::DeepSleep(measurement_interval)` - after a publish
    /// * `TerminalAction::DeepSleep(error_sleep)` - after any failure
    pub async fn run(&mut self) -> TerminalAction {
        let action = match self.run_cycle().await {
            Ok(()) => TerminalAction::DeepSleep(self.settings.measurement_interval),
            Err(e) => {
                error!("Error in main loop: {}", e);
                TerminalAction::DeepSleep(self.settings.error_sleep)
            }
        };

        self.supervisor.transition(AgentState::Sleeping);
        action
    }

    async fn run_cycle(&mut self) -> Result<()> {
        let clock = self.platform.clock.clone();
        let clock_ref: &dyn Clock = clock.as_ref();
        let uptime = UptimeCounter::start(clock.clone());
        info!("Current timestamp is: {}", format_timestamp(&clock.now()));

        let power = match &self.platform.battery {
            Some(battery) => {
                info!("Measuring battery charge level");
                let snapshot = battery.snapshot()?;
                info!("Current battery voltage level: {}", snapshot.current_voltage);
                info!("Battery charge percentage level: {}", snapshot.charge_percentage);
                Some(snapshot)
            }
            None => None,
        };

        self.supervisor.transition(AgentState::ConnectingNetwork);
        let wireless = self.platform.wireless.as_ref();
        let wifi = &self.settings.wifi;
        let network = self
            .settings
            .retry
            .wifi
            .run(clock_ref, move || network::bring_up(wireless, clock_ref, wifi, None))
            .await?;

        self.supervisor.transition(AgentState::ConnectingBroker);
        let mut client = connect_with_retry(
            &self.platform.connector,
            &self.settings.broker,
            &self.settings.retry.broker,
            clock_ref,
        )
        .await?;

        let mut enricher = MetadataEnricher::new(
            network.mac_address.to_string().to_lowercase(),
            self.platform.machine_unique_id.clone(),
            clock.clone(),
            self.platform.cpu_temperature.clone(),
            self.platform.system.clone(),
        )
        .with_uptime(uptime)
        .with_runtime_details();
        if let Some(power) = power {
            enricher = enricher.with_power(power);
        }
        let cycle = MeasurementCycle::new(
            self.platform.sensor.clone(),
            Box::new(enricher),
            self.settings.topic.clone(),
            self.settings.retry.sensor.clone(),
            clock.clone(),
        );

        self.supervisor.transition(AgentState::Running);
        cycle.run(&mut client).await?;

        client.disconnect().await?;
        network::deactivate(wireless).await?;
        clock.sleep(self.settings.settle_delay).await;

        for pin in &self.platform.power_down_pins {
            pin.set_low()?;
        }
        Ok(())
    }
}

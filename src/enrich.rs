//! # Enrichment
//!
//! Attaches device context to a measurement before it is published.
//!
//! An [`Enricher`] is built once at startup with everything it needs
//! (network MAC, hardware id, clock, metric providers) and then invoked for
//! every draft envelope.

use std::sync::Arc;
use tracing::debug;

use crate::clock::{format_timestamp, Clock};
use crate::error::Result;
use crate::metrics::system::SystemStats;
use crate::metrics::temperature::CpuTemperature;
use crate::metrics::uptime::UptimeCounter;
use crate::payload::{DeviceMetadata, DraftEnvelope, MachineMetrics, PowerMetrics};

/// Strategy that attaches metadata to a draft envelope in place
pub trait Enricher: Send + Sync {
    fn enrich(&self, draft: &mut DraftEnvelope) -> Result<()>;
}

/// Attaches [`DeviceMetadata`] read from the configured providers.
///
/// The base record carries CPU temperature, free memory and free flash.
/// Builders opt into uptime, runtime details (version and CPU frequency)
/// and a power snapshot.
pub struct MetadataEnricher {
    mac_address: String,
    machine_unique_id: String,
    clock: Arc<dyn Clock>,
    cpu_temperature: Arc<dyn CpuTemperature>,
    system: Arc<dyn SystemStats>,
    uptime: Option<UptimeCounter>,
    power: Option<PowerMetrics>,
    runtime_details: bool,
}

impl MetadataEnricher {
    /// Creates an enricher bound to one device.
    ///
    /// # Arguments
    ///
    /// * `mac_address` - Colon-delimited MAC of the connected interface
    /// * `machine_unique_id` - Colon-delimited hardware id
    /// * `clock` - RTC used for the measurement timestamp
    /// * `cpu_temperature` - CPU temperature provider
    /// * `system` - Memory, flash and CPU statistics
    pub fn new(
        mac_address: impl Into<String>,
        machine_unique_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        cpu_temperature: Arc<dyn CpuTemperature>,
        system: Arc<dyn SystemStats>,
    ) -> Self {
        Self {
            mac_address: mac_address.into(),
            machine_unique_id: machine_unique_id.into(),
            clock,
            cpu_temperature,
            system,
            uptime: None,
            power: None,
            runtime_details: false,
        }
    }

    #[must_use]
    pub fn with_uptime(mut self, uptime: UptimeCounter) -> Self {
        self.uptime = Some(uptime);
        self
    }

    /// Reports a battery snapshot taken earlier in the cycle.
    #[must_use]
    pub fn with_power(mut self, power: PowerMetrics) -> Self {
        self.power = Some(power);
        self
    }

    /// Adds firmware version and CPU frequency.
    #[must_use]
    pub fn with_runtime_details(mut self) -> Self {
        self.runtime_details = true;
        self
    }

    fn machine_metrics(&self) -> Result<MachineMetrics> {
        let (runtime_version, frequency) = if self.runtime_details {
            (
                Some(self.system.runtime_version()),
                Some(self.system.cpu_frequency_hz()?),
            )
        } else {
            (None, None)
        };

        Ok(MachineMetrics {
            uptime: self.uptime.as_ref().map(UptimeCounter::uptime_ms),
            runtime_version,
            cpu_temperature: self.cpu_temperature.current_temperature()?,
            mem_free: self.system.mem_free()?,
            flash_free_space_bytes: self.system.flash_free_bytes()?,
            frequency,
            power: self.power,
        })
    }
}

impl Enricher for MetadataEnricher {
    fn enrich(&self, draft: &mut DraftEnvelope) -> Result<()> {
        let metadata = DeviceMetadata {
            wifi_mac_address: self.mac_address.clone(),
            machine_unique_id: self.machine_unique_id.clone(),
            measurement_time: format_timestamp(&self.clock.now()),
            machine_metrics: self.machine_metrics()?,
        };
        debug!("Enriched measurement at {}", metadata.measurement_time);
        draft.attach(metadata);
        Ok(())
    }
}

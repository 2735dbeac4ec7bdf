//! # Measurement Pipeline
//!
//! One measure → enrich → seal → serialize → publish pass.

use std::sync::Arc;
use tracing::info;

use crate::broker::BrokerClient;
use crate::clock::Clock;
use crate::enrich::Enricher;
use crate::error::Result;
use crate::payload::{DraftEnvelope, Envelope};
use crate::retry::RetryPolicy;
use crate::sensor::EnvironmentSensor;

/// Reads, enriches and publishes one measurement per [`run`](Self::run).
pub struct MeasurementCycle {
    sensor: Arc<dyn EnvironmentSensor>,
    enricher: Box<dyn Enricher>,
    topic: String,
    read_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl MeasurementCycle {
    /// # Arguments
    ///
    /// * `sensor` - Environmental sensor
    /// * `enricher` - Metadata strategy applied to every draft
    /// * `topic` - Outbound topic
    /// * `read_policy` - Retry policy around the sensor read
    /// * `clock` - Sleeper for read retries
    pub fn new(
        sensor: Arc<dyn EnvironmentSensor>,
        enricher: Box<dyn Enricher>,
        topic: impl Into<String>,
        read_policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sensor,
            enricher,
            topic: topic.into(),
            read_policy,
            clock,
        }
    }

    /// Publishes one enriched measurement through `client`.
    ///
    /// # Returns
    ///
    /// * `Result<Envelope>` - The envelope that was published
    ///
    /// # Errors
    ///
    /// Returns the sensor error once the read policy is exhausted, any
    /// enrichment error, `IncompleteEnvelope` if the enricher attached
    /// nothing, or the broker's publish error. Nothing is published on any
    /// of these paths.
    pub async fn run<C>(&self, client: &mut C) -> Result<Envelope>
    where
        C: BrokerClient + ?Sized,
    {
        let sensor = self.sensor.as_ref();
        let measurement = self
            .read_policy
            .run(self.clock.as_ref(), move || sensor.read())
            .await?;

        let mut draft = DraftEnvelope::new(measurement);
        self.enricher.enrich(&mut draft)?;
        let envelope = draft.seal()?;
        let json = envelope.to_json()?;

        info!("Sending measurements via MQTT: {}", json);
        client.publish(&self.topic, json.as_bytes()).await?;

        Ok(envelope)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::payload::fixtures::continuous_metadata;

    /// Enricher attaching fixed metadata
    pub struct FixedEnricher;

    impl Enricher for FixedEnricher {
        fn enrich(&self, draft: &mut DraftEnvelope) -> Result<()> {
            draft.attach(continuous_metadata());
            Ok(())
        }
    }

    /// Enricher that forgets to attach anything
    pub struct ForgetfulEnricher;

    impl Enricher for ForgetfulEnricher {
        fn enrich(&self, _draft: &mut DraftEnvelope) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::{FixedEnricher, ForgetfulEnricher};
    use super::*;
    use crate::broker::mocks::MockConnector;
    use crate::broker::{BrokerConnector, BrokerSettings};
    use crate::clock::mocks::ManualClock;
    use crate::error::TelemetryError;
    use crate::sensor::mocks::{MockSensor, SAMPLE};
    use std::time::Duration;

    const TOPIC: &str = "sensors/picow/measurements";

    async fn session(connector: &MockConnector) -> crate::broker::mocks::MockClient {
        connector
            .connect(&BrokerSettings::new("picow-1", "broker.local"))
            .await
            .unwrap()
    }

    fn build_cycle(
        sensor: MockSensor,
        enricher: Box<dyn Enricher>,
        policy: RetryPolicy,
    ) -> (MeasurementCycle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cycle = MeasurementCycle::new(Arc::new(sensor), enricher, TOPIC, policy, clock.clone());
        (cycle, clock)
    }

    #[tokio::test]
    async fn test_publishes_enriched_envelope() {
        let connector = MockConnector::new();
        let mut client = session(&connector).await;
        let (cycle, _) = build_cycle(MockSensor::new(SAMPLE), Box::new(FixedEnricher), RetryPolicy::once());

        let envelope = cycle.run(&mut client).await.unwrap();

        let published = connector.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, TOPIC);
        assert_eq!(published[0].1, envelope.to_json().unwrap());

        let json: serde_json::Value = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(json["payload"]["bme280"]["temperature"], 21.37);
        assert!(json["metadata"]["machine_metrics"].is_object());
    }

    #[tokio::test]
    async fn test_missing_metadata_is_never_published() {
        let connector = MockConnector::new();
        let mut client = session(&connector).await;
        let (cycle, _) = build_cycle(MockSensor::new(SAMPLE), Box::new(ForgetfulEnricher), RetryPolicy::once());

        let result = cycle.run(&mut client).await;

        assert!(matches!(result, Err(TelemetryError::IncompleteEnvelope)));
        assert!(connector.published().is_empty());
    }

    #[tokio::test]
    async fn test_sensor_read_retried_under_policy() {
        let connector = MockConnector::new();
        let mut client = session(&connector).await;
        let sensor = MockSensor::new(SAMPLE);
        sensor.fail_next(1);
        let policy = RetryPolicy::new(2, 5.0, 2.0).unwrap();
        let (cycle, clock) = build_cycle(sensor.clone(), Box::new(FixedEnricher), policy);

        cycle.run(&mut client).await.unwrap();

        assert_eq!(sensor.reads(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
        assert_eq!(connector.published().len(), 1);
    }

    #[tokio::test]
    async fn test_sensor_failure_without_retry_publishes_nothing() {
        let connector = MockConnector::new();
        let mut client = session(&connector).await;
        let sensor = MockSensor::new(SAMPLE);
        sensor.fail_next(1);
        let (cycle, clock) = build_cycle(sensor.clone(), Box::new(FixedEnricher), RetryPolicy::once());

        let result = cycle.run(&mut client).await;

        assert!(matches!(result, Err(TelemetryError::Sensor(_))));
        assert_eq!(sensor.reads(), 1);
        assert!(clock.sleeps().is_empty());
        assert!(connector.published().is_empty());
    }
}

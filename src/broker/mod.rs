//! # Broker Module
//!
//! Publish/subscribe session with the message broker.
//!
//! A session is an owned [`BrokerClient`] value. Whoever holds it drives
//! it and disconnects it; there is no process-wide connection handle.

pub mod rumqtt;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

use crate::clock::Clock;
use crate::error::Result;
use crate::retry::RetryPolicy;

/// Default keepalive interval.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);

/// Default broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// Connection parameters for one broker session
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive: Duration,
}

impl BrokerSettings {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Trait for a connected broker session
#[async_trait]
pub trait BrokerClient: Send {
    /// Publishes `payload` to `topic`.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Waits for the next inbound message.
    ///
    /// Returns `Ok(None)` once the broker has closed the session.
    async fn next_message(&mut self) -> Result<Option<InboundMessage>>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Trait for opening broker sessions
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Client: BrokerClient;

    /// Opens a clean session.
    async fn connect(&self, settings: &BrokerSettings) -> Result<Self::Client>;
}

/// Opens a session under `policy`.
///
/// Connection failures are retried with backoff; the last failure is
/// returned once the policy is exhausted.
pub async fn connect_with_retry<B>(
    connector: &B,
    settings: &BrokerSettings,
    policy: &RetryPolicy,
    clock: &dyn Clock,
) -> Result<B::Client>
where
    B: BrokerConnector + ?Sized,
{
    let client = policy
        .run(clock, move || {
            info!(
                "Trying connect to MQTT server - {}:{}",
                settings.host, settings.port
            );
            connector.connect(settings)
        })
        .await?;

    info!("Connected to MQTT Broker {}...", settings.host);
    Ok(client)
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::TelemetryError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Everything a mock session observed, shared with the test.
    #[derive(Debug, Default)]
    pub struct SessionLog {
        pub published: Vec<(String, String)>,
        pub subscriptions: Vec<String>,
        pub disconnected: bool,
    }

    /// Fake broker session
    pub struct MockClient {
        pub log: Arc<Mutex<SessionLog>>,
        pub inbound: VecDeque<InboundMessage>,
        /// Publishes that succeed before every further publish fails
        pub publish_budget: Option<u32>,
    }

    #[async_trait]
    impl BrokerClient for MockClient {
        async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
            if let Some(budget) = self.publish_budget.as_mut() {
                if *budget == 0 {
                    return Err(TelemetryError::Broker("connection reset by peer".to_string()));
                }
                *budget -= 1;
            }
            let text = String::from_utf8_lossy(payload).into_owned();
            self.log
                .lock()
                .unwrap()
                .published
                .push((topic.to_string(), text));
            Ok(())
        }

        async fn subscribe(&mut self, topic: &str) -> Result<()> {
            self.log.lock().unwrap().subscriptions.push(topic.to_string());
            Ok(())
        }

        async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
            match self.inbound.pop_front() {
                Some(message) => Ok(Some(message)),
                // Idle until the caller gives up
                None => std::future::pending().await,
            }
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.log.lock().unwrap().disconnected = true;
            Ok(())
        }
    }

    /// Fake connector: fails a scripted number of times, then hands out
    /// [`MockClient`]s sharing one [`SessionLog`].
    #[derive(Clone, Default)]
    pub struct MockConnector {
        pub failures_left: Arc<AtomicU32>,
        pub attempts: Arc<AtomicU32>,
        pub log: Arc<Mutex<SessionLog>>,
        pub inbound: Arc<Mutex<Vec<InboundMessage>>>,
        pub publish_budget: Option<u32>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(times: u32) -> Self {
            let connector = Self::default();
            connector.failures_left.store(times, Ordering::SeqCst);
            connector
        }

        /// Sessions reject every publish after the first `count`.
        #[must_use]
        pub fn with_publish_budget(mut self, count: u32) -> Self {
            self.publish_budget = Some(count);
            self
        }

        pub fn queue_inbound(&self, topic: &str, payload: &[u8]) {
            self.inbound.lock().unwrap().push(InboundMessage {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(payload),
            });
        }

        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }

        pub fn published(&self) -> Vec<(String, String)> {
            self.log.lock().unwrap().published.clone()
        }

        pub fn subscriptions(&self) -> Vec<String> {
            self.log.lock().unwrap().subscriptions.clone()
        }

        pub fn disconnected(&self) -> bool {
            self.log.lock().unwrap().disconnected
        }
    }

    #[async_trait]
    impl BrokerConnector for MockConnector {
        type Client = MockClient;

        async fn connect(&self, settings: &BrokerSettings) -> Result<MockClient> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(TelemetryError::Broker(format!(
                    "{} refused connection",
                    settings.host
                )));
            }
            Ok(MockClient {
                log: self.log.clone(),
                inbound: self.inbound.lock().unwrap().drain(..).collect(),
                publish_budget: self.publish_budget,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockConnector;
    use super::*;
    use crate::clock::mocks::ManualClock;
    use crate::error::TelemetryError;

    fn settings() -> BrokerSettings {
        BrokerSettings::new("picow-1", "broker.local").with_credentials("sensor", "hunter2")
    }

    #[test]
    fn test_settings_defaults() {
        let settings = BrokerSettings::new("picow-1", "broker.local");
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.keepalive, Duration::from_secs(60));
        assert!(settings.username.is_none());
    }

    #[tokio::test]
    async fn test_connect_retries_with_backoff() {
        let clock = ManualClock::new();
        let connector = MockConnector::failing(3);
        let policy = RetryPolicy::new(5, 5.0, 2.0).unwrap();

        let result = connect_with_retry(&connector, &settings(), &policy, &clock).await;

        assert!(result.is_ok());
        assert_eq!(connector.attempts(), 4);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_exhaustion_propagates_last_error() {
        let clock = ManualClock::new();
        let connector = MockConnector::failing(10);
        let policy = RetryPolicy::new(2, 5.0, 2.0).unwrap();

        let result = connect_with_retry(&connector, &settings(), &policy, &clock).await;

        assert!(matches!(result, Err(TelemetryError::Broker(_))));
        assert_eq!(connector.attempts(), 2);
        assert_eq!(clock.total_slept(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_session_publish_and_disconnect() {
        let clock = ManualClock::new();
        let connector = MockConnector::new();
        let mut client = connect_with_retry(&connector, &settings(), &RetryPolicy::once(), &clock)
            .await
            .unwrap();

        client.publish("sensors/picow", b"{}").await.unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(
            connector.published(),
            vec![("sensors/picow".to_string(), "{}".to_string())]
        );
        assert!(connector.disconnected());
    }
}

//! `rumqttc` implementation of the broker session.
//!
//! The CONNACK is awaited inline. After that the event loop moves into a
//! driver task that polls it for as long as the session lives, so keepalive
//! pings go out and their responses are read while the owner is idle. The
//! driver forwards the events the session waits on over a channel and stops
//! at the first connection error; that error surfaces on the next call.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BrokerClient, BrokerConnector, BrokerSettings, InboundMessage};
use crate::error::{Result, TelemetryError};

/// Default request channel capacity.
pub const DEFAULT_CAPACITY: usize = 10;

/// Opens sessions with `rumqttc`
#[derive(Debug, Clone)]
pub struct RumqttConnector {
    capacity: usize,
}

impl RumqttConnector {
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Default for RumqttConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the `rumqttc` options for a clean session.
pub fn mqtt_options(settings: &BrokerSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keepalive);
    options.set_clean_session(true);

    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username, password);
    }

    options
}

/// Polls until the broker answers the CONNECT.
async fn await_connack(eventloop: &mut EventLoop, host: &str) -> Result<()> {
    loop {
        let event = eventloop
            .poll()
            .await
            .map_err(|e| TelemetryError::Broker(e.to_string()))?;

        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(TelemetryError::Broker(format!(
                        "Connection refused by {}: {:?}",
                        host, code
                    ))),
                };
            }
            other => debug!("MQTT event: {:?}", other),
        }
    }
}

#[async_trait]
impl BrokerConnector for RumqttConnector {
    type Client = RumqttClient;

    async fn connect(&self, settings: &BrokerSettings) -> Result<RumqttClient> {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(settings), self.capacity);
        await_connack(&mut eventloop, &settings.host).await?;

        let (sender, events) = mpsc::unbounded_channel();
        let driver = spawn_driver(eventloop, sender);

        Ok(RumqttClient {
            client,
            events,
            driver,
            pending: VecDeque::new(),
        })
    }
}

/// What the driver task reports back to the session
#[derive(Debug)]
enum SessionEvent {
    Inbound(InboundMessage),
    Published,
    Subscribed,
    /// Our DISCONNECT has been written
    Disconnected,
    /// The broker sent DISCONNECT
    Closed,
    Failed(String),
}

/// Polls `eventloop` until the session ends or the receiver goes away.
fn spawn_driver(
    mut eventloop: EventLoop,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match eventloop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    warn!("MQTT connection lost: {}", e);
                    let _ = events.send(SessionEvent::Failed(e.to_string()));
                    break;
                }
            };

            let forwarded = match event {
                Event::Incoming(Packet::Publish(publish)) => SessionEvent::Inbound(InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                }),
                Event::Incoming(Packet::SubAck(_)) => SessionEvent::Subscribed,
                Event::Incoming(Packet::Disconnect) => SessionEvent::Closed,
                Event::Outgoing(Outgoing::Publish(_)) => SessionEvent::Published,
                Event::Outgoing(Outgoing::Disconnect) => SessionEvent::Disconnected,
                other => {
                    debug!("MQTT event: {:?}", other);
                    continue;
                }
            };

            let last = matches!(
                forwarded,
                SessionEvent::Closed | SessionEvent::Disconnected
            );
            if events.send(forwarded).is_err() || last {
                break;
            }
        }
        debug!("MQTT event loop stopped");
    })
}

/// Connected `rumqttc` session
pub struct RumqttClient {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    driver: JoinHandle<()>,
    /// Publishes received while waiting for something else
    pending: VecDeque<InboundMessage>,
}

impl RumqttClient {
    /// Waits for the driver to report an event accepted by `done`.
    ///
    /// Incoming publishes seen on the way are queued for `next_message`.
    async fn wait_for<F>(&mut self, done: F) -> Result<()>
    where
        F: Fn(&SessionEvent) -> bool,
    {
        loop {
            match self.events.recv().await {
                Some(SessionEvent::Inbound(message)) => self.pending.push_back(message),
                Some(SessionEvent::Failed(e)) => return Err(TelemetryError::Broker(e)),
                Some(SessionEvent::Closed) => {
                    return Err(TelemetryError::Broker(
                        "Broker closed the session".to_string(),
                    ));
                }
                Some(event) if done(&event) => return Ok(()),
                Some(event) => debug!("Ignoring stale session event: {:?}", event),
                None => {
                    return Err(TelemetryError::Broker(
                        "MQTT session is no longer running".to_string(),
                    ));
                }
            }
        }
    }
}

impl Drop for RumqttClient {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl BrokerClient for RumqttClient {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| TelemetryError::Broker(e.to_string()))?;

        self.wait_for(|event| matches!(event, SessionEvent::Published))
            .await
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TelemetryError::Broker(e.to_string()))?;

        self.wait_for(|event| matches!(event, SessionEvent::Subscribed))
            .await
    }

    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }

        loop {
            match self.events.recv().await {
                Some(SessionEvent::Inbound(message)) => return Ok(Some(message)),
                Some(SessionEvent::Failed(e)) => return Err(TelemetryError::Broker(e)),
                Some(SessionEvent::Closed) | None => return Ok(None),
                Some(event) => debug!("Ignoring session event: {:?}", event),
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TelemetryError::Broker(e.to_string()))?;

        let result = self
            .wait_for(|event| matches!(event, SessionEvent::Disconnected))
            .await;

        if let Err(e) = &result {
            warn!("Disconnect did not complete cleanly: {}", e);
        }
        result
    }
}

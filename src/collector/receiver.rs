//! Subscription loop shared by the collector binaries.

use std::future::Future;
use tracing::{info, warn};

use super::{decode_message, MessageHandler};
use crate::broker::{BrokerClient, InboundMessage};
use crate::error::Result;

/// Owns one broker session and feeds every decodable message to its
/// handlers, in registration order.
///
/// A handler error is logged and affects only that message.
pub struct Receiver<C: BrokerClient> {
    client: C,
    topic: String,
    handlers: Vec<Box<dyn MessageHandler>>,
}

impl<C: BrokerClient> Receiver<C> {
    pub fn new(client: C, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            handlers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Box<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Subscribes and dispatches until `shutdown` completes or the broker
    /// closes the session.
    ///
    /// # Returns
    ///
    /// * `Result<u64>` - Number of decoded messages dispatched
    ///
    /// # Errors
    ///
    /// Returns the broker error if subscribing or receiving fails.
    pub async fn run<S>(mut self, shutdown: S) -> Result<u64>
    where
        S: Future<Output = ()>,
    {
        self.client.subscribe(&self.topic).await?;
        info!("Listening to topic '{}'", self.topic);

        tokio::pin!(shutdown);
        let mut dispatched = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Exiting...");
                    self.client.disconnect().await?;
                    break;
                }

                message = self.client.next_message() => {
                    match message? {
                        Some(message) => {
                            if dispatch(&self.handlers, &message).await {
                                dispatched += 1;
                            }
                        }
                        None => {
                            warn!("Broker closed the session");
                            break;
                        }
                    }
                }
            }
        }

        info!("Application finished ({} messages)", dispatched);
        Ok(dispatched)
    }
}

/// Returns `false` if the message was dropped as undecodable.
async fn dispatch(handlers: &[Box<dyn MessageHandler>], message: &InboundMessage) -> bool {
    let Some(value) = decode_message(&message.payload) else {
        return false;
    };

    for handler in handlers {
        if let Err(e) = handler.handle(&message.topic, &value).await {
            warn!("Failed to handle message on '{}': {}", message.topic, e);
        }
    }
    true
}

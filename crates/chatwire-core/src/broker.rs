//! Cross-process fan-out.
//!
//! The broker wraps one topic on a [`PubSub`] fabric. Publishing wraps the
//! payload in an [`Envelope`] naming the target user; every subscribed
//! process receives every envelope and hands it to its local handler.
//! Delivery is at-most-once: nothing is retried or buffered here.

use bytes::Bytes;
use chatwire_protocol::{codec, Envelope, UserId, DEFAULT_TOPIC};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace};

use crate::pubsub::{BrokerError, MemoryPubSub, PayloadStream, PubSub};
use crate::telemetry;

/// First delay before re-subscribing after the fabric ends a subscription.
const INITIAL_RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound on the re-subscribe delay.
const MAX_RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(5);

/// Envelope fan-out over a shared topic.
#[derive(Clone)]
pub struct Broker {
    fabric: Arc<dyn PubSub>,
    topic: String,
}

impl Broker {
    /// Create a broker on the default topic.
    #[must_use]
    pub fn new(fabric: Arc<dyn PubSub>) -> Self {
        Self::with_topic(fabric, DEFAULT_TOPIC)
    }

    /// Create a broker on a specific topic.
    #[must_use]
    pub fn with_topic(fabric: Arc<dyn PubSub>, topic: impl Into<String>) -> Self {
        Self {
            fabric,
            topic: topic.into(),
        }
    }

    /// Create a broker over a private in-memory fabric (single process).
    #[must_use]
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryPubSub::new()))
    }

    /// Get the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the fabric backend name.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.fabric.name()
    }

    /// Publish `payload` for `user_id` to every process.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be serialized or the fabric
    /// rejects the publish. Nothing is retried.
    pub async fn publish(&self, user_id: UserId, payload: Bytes) -> Result<(), BrokerError> {
        let data = codec::encode_envelope(&Envelope::new(user_id, payload))?;
        self.fabric.publish(&self.topic, data).await?;
        trace!(user = user_id, topic = %self.topic, "Published envelope");
        Ok(())
    }

    /// Subscribe to the topic and invoke `handler` for every envelope.
    ///
    /// The subscription is open when this returns. Envelopes are decoded and
    /// dispatched on a dedicated task; malformed envelopes are dropped. If
    /// the fabric ends the subscription, the task re-subscribes with
    /// exponential backoff. Envelopes published while it is down are lost.
    /// The handler must not block.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial subscription cannot be opened.
    pub async fn subscribe<F>(&self, handler: F) -> Result<JoinHandle<()>, BrokerError>
    where
        F: Fn(UserId, Bytes) + Send + Sync + 'static,
    {
        let mut stream = self.fabric.subscribe(&self.topic).await?;
        let fabric = self.fabric.clone();
        let topic = self.topic.clone();
        info!(topic = %topic, backend = fabric.name(), "Broker subscribed");

        Ok(tokio::spawn(async move {
            loop {
                while let Some(data) = stream.next().await {
                    match codec::decode_envelope(&data) {
                        Ok(envelope) => handler(envelope.user_id, envelope.payload),
                        Err(e) => debug!(topic = %topic, error = %e, "Dropping malformed envelope"),
                    }
                }

                telemetry::record_error("subscription_ended");
                error!(topic = %topic, backend = fabric.name(), "Broker subscription ended, re-subscribing");
                stream = resubscribe(fabric.as_ref(), &topic).await;
                info!(topic = %topic, backend = fabric.name(), "Broker re-subscribed");
            }
        }))
    }
}

/// Keep trying to open a subscription, doubling the delay up to
/// [`MAX_RESUBSCRIBE_BACKOFF`].
async fn resubscribe(fabric: &dyn PubSub, topic: &str) -> PayloadStream {
    let mut backoff = INITIAL_RESUBSCRIBE_BACKOFF;
    loop {
        sleep(backoff).await;
        match fabric.subscribe(topic).await {
            Ok(stream) => return stream,
            Err(e) => {
                backoff = (backoff * 2).min(MAX_RESUBSCRIBE_BACKOFF);
                telemetry::record_error("subscribe");
                error!(topic = %topic, error = %e, retry_in = ?backoff, "Re-subscribe failed");
            }
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("backend", &self.fabric.name())
            .field("topic", &self.topic)
            .finish()
    }
}

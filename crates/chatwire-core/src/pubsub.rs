//! Publish/subscribe fabric shared by every chatwire process.
//!
//! The fabric moves opaque byte payloads on named topics. It knows nothing
//! about users or events; see [`Broker`](crate::broker::Broker) for the
//! envelope layer on top.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default per-topic buffer for the in-memory fabric.
const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// A stream of payloads received on one topic.
pub type PayloadStream = BoxStream<'static, Bytes>;

/// Fabric and broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Envelope could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] chatwire_protocol::ProtocolError),

    /// Could not reach the fabric.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Publish was rejected or failed in transit.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Subscription could not be opened.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),
}

/// A topic-based pub/sub transport.
///
/// Implementations must tolerate concurrent `publish` calls and at least one
/// long-lived subscription per topic.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Open a subscription to `topic`.
    ///
    /// The subscription is active when this returns: anything published
    /// afterwards is delivered to the stream.
    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, BrokerError>;

    /// Get the backend name.
    fn name(&self) -> &'static str;
}

/// In-process fabric.
///
/// Hubs sharing one `MemoryPubSub` see each other's publishes exactly as
/// separate processes sharing one external channel would.
#[derive(Debug)]
pub struct MemoryPubSub {
    topics: DashMap<String, broadcast::Sender<Bytes>>,
    capacity: usize,
}

impl MemoryPubSub {
    /// Create a fabric with the default per-topic buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// Create a fabric with a specific per-topic buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    /// Number of live subscriptions on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|t| t.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        // No subscribers is not an error; the payload is simply gone.
        let delivered = self.sender(topic).send(payload).unwrap_or(0);
        debug!(topic = %topic, subscribers = delivered, "Published to memory fabric");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, BrokerError> {
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();

        let stream = stream::unfold(receiver, move |mut receiver| {
            let topic = topic.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "Subscriber lagged, payloads lost");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(feature = "redis")]
pub use self::redis_backend::RedisPubSub;

#[cfg(feature = "redis")]
mod redis_backend {
    use super::{BrokerError, PayloadStream, PubSub};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use redis::AsyncCommands;
    use tracing::info;

    /// Redis PUBLISH/SUBSCRIBE fabric.
    pub struct RedisPubSub {
        client: redis::Client,
        publisher: redis::aio::MultiplexedConnection,
    }

    impl RedisPubSub {
        /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
        ///
        /// # Errors
        ///
        /// Returns an error if the server cannot be reached.
        pub async fn connect(url: &str) -> Result<Self, BrokerError> {
            let client =
                redis::Client::open(url).map_err(|e| BrokerError::Connect(e.to_string()))?;
            let publisher = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| BrokerError::Connect(e.to_string()))?;

            info!(url = %url, "Connected to Redis fabric");
            Ok(Self { client, publisher })
        }
    }

    #[async_trait]
    impl PubSub for RedisPubSub {
        async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
            let mut conn = self.publisher.clone();
            let _receivers: i64 = conn
                .publish(topic, payload.as_ref())
                .await
                .map_err(|e| BrokerError::Publish(e.to_string()))?;
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> Result<PayloadStream, BrokerError> {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
            pubsub
                .subscribe(topic)
                .await
                .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

            let stream = pubsub
                .into_on_message()
                .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()));
            Ok(Box::pin(stream))
        }

        fn name(&self) -> &'static str {
            "redis"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_memory_fanout_to_all_subscribers() {
        let fabric = MemoryPubSub::new();
        let mut first = fabric.subscribe("t").await.unwrap();
        let mut second = fabric.subscribe("t").await.unwrap();
        assert_eq!(fabric.subscriber_count("t"), 2);

        fabric.publish("t", Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(first.next().await, Some(Bytes::from_static(b"hello")));
        assert_eq!(second.next().await, Some(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn test_memory_topics_are_isolated() {
        let fabric = MemoryPubSub::new();
        let mut other = fabric.subscribe("other").await.unwrap();

        fabric.publish("t", Bytes::from_static(b"x")).await.unwrap();
        fabric.publish("other", Bytes::from_static(b"y")).await.unwrap();

        assert_eq!(other.next().await, Some(Bytes::from_static(b"y")));
    }

    #[tokio::test]
    async fn test_memory_publish_without_subscribers() {
        let fabric = MemoryPubSub::new();
        assert!(fabric.publish("t", Bytes::from_static(b"x")).await.is_ok());
        assert_eq!(fabric.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn test_memory_lagged_subscriber_continues() {
        let fabric = MemoryPubSub::with_capacity(2);
        let mut sub = fabric.subscribe("t").await.unwrap();

        for i in 0..5u8 {
            fabric.publish("t", Bytes::from(vec![i])).await.unwrap();
        }

        // Oldest payloads were overwritten; the newest survive.
        assert_eq!(sub.next().await, Some(Bytes::from(vec![3u8])));
        assert_eq!(sub.next().await, Some(Bytes::from(vec![4u8])));
    }
}

//! Client registry and presence for chatwire.
//!
//! The hub maps each user id to at most one live [`Client`] in this process.
//! Every mutation happens under the registry's write lock, and presence
//! events are queued before the lock is released, so observers always see
//! presence in registry order.
//!
//! Outbound delivery never touches the map directly: [`Hub::send_to_user`]
//! publishes through the [`Broker`], and every hub's subscription hands the
//! envelope to [`Hub::dispatch`], which delivers it only if the user is
//! connected here.

use bytes::Bytes;
use chatwire_protocol::{codec, OutboundEvent, UserId};
use chatwire_transport::ConnectionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::broker::Broker;
use crate::client::{Client, ClientKey, ClientQueue, EnqueueError, DEFAULT_QUEUE_CAPACITY};
use crate::pubsub::BrokerError;
use crate::telemetry;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue capacity per client.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// The process-local client registry.
pub struct Hub {
    clients: RwLock<HashMap<UserId, Client>>,
    broker: Broker,
    config: HubConfig,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new(broker: Broker) -> Self {
        Self::with_config(broker, HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(broker: Broker, config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            clients: RwLock::new(HashMap::new()),
            broker,
            config,
        }
    }

    /// Subscribe to the broker so envelopes for local users get delivered.
    ///
    /// Call once per hub at startup. The subscription holds only a weak
    /// reference; it stops delivering once the hub is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker subscription cannot be opened.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, BrokerError> {
        let hub = Arc::downgrade(self);
        self.broker
            .subscribe(move |user_id, payload| {
                if let Some(hub) = hub.upgrade() {
                    hub.dispatch(user_id, payload);
                }
            })
            .await
    }

    /// Get the broker this hub publishes through.
    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Get the hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Create a client for `user_id` on `connection_id` and register it.
    ///
    /// Returns the registration key and the queue for the write loop.
    pub fn connect(&self, user_id: UserId, connection_id: ConnectionId) -> (ClientKey, ClientQueue) {
        let (client, queue) = Client::new(user_id, connection_id, self.config.queue_capacity);
        let key = client.key();
        self.register(client);
        (key, queue)
    }

    /// Register a client.
    ///
    /// An existing client for the same user is replaced and its queue
    /// closed. The new client receives the online list; every registered
    /// client, the new one included, receives an `online` event.
    pub fn register(&self, client: Client) {
        let key = client.key();
        let mut clients = self.clients.write();

        if let Some(previous) = clients.insert(key.user_id, client) {
            debug!(
                user = key.user_id,
                previous = %previous.connection_id(),
                connection = %key.connection_id,
                "Replacing existing connection"
            );
            drop(previous);
        }

        let mut overflowed = Vec::new();
        let online = sorted_ids(&clients);
        if let Some(payload) = encode(&OutboundEvent::presence(online)) {
            if let Some(client) = clients.get(&key.user_id) {
                if client.try_enqueue(payload) == Err(EnqueueError::Full) {
                    overflowed.push(key.user_id);
                }
            }
        }

        if let Some(payload) = encode(&OutboundEvent::online(key.user_id)) {
            overflowed.extend(broadcast_locked(&clients, &payload));
        }

        info!(
            user = key.user_id,
            connection = %key.connection_id,
            online = clients.len(),
            "Client registered"
        );

        evict_locked(&mut clients, overflowed);
    }

    /// Unregister a client.
    ///
    /// Only removes the entry if it still belongs to `key`'s connection;
    /// a stale request from a replaced or evicted connection is a no-op.
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, key: ClientKey) -> bool {
        let mut clients = self.clients.write();

        match clients.get(&key.user_id) {
            Some(current) if current.connection_id() == key.connection_id => {}
            _ => {
                trace!(
                    user = key.user_id,
                    connection = %key.connection_id,
                    "Ignoring stale unregister"
                );
                return false;
            }
        }

        clients.remove(&key.user_id);
        info!(
            user = key.user_id,
            connection = %key.connection_id,
            online = clients.len(),
            "Client unregistered"
        );

        let overflowed = match encode(&OutboundEvent::offline(key.user_id)) {
            Some(payload) => broadcast_locked(&clients, &payload),
            None => Vec::new(),
        };
        evict_locked(&mut clients, overflowed);
        true
    }

    /// Send a payload to a user wherever they are connected.
    ///
    /// Goes through the broker even when the user is local. A user connected
    /// nowhere receives nothing. Publish failures are logged and the payload
    /// is lost.
    pub async fn send_to_user(&self, user_id: UserId, payload: Bytes) {
        if let Err(e) = self.broker.publish(user_id, payload).await {
            telemetry::record_publish_failure();
            error!(user = user_id, error = %e, "Failed to publish message");
        }
    }

    /// Serialize and send an event to a user.
    pub async fn send_event(&self, user_id: UserId, event: &OutboundEvent) {
        if let Some(payload) = encode(event) {
            self.send_to_user(user_id, payload).await;
        }
    }

    /// Deliver a payload to a locally connected user.
    ///
    /// Called for every envelope received from the broker. Returns `true`
    /// if the payload was queued. A full queue disconnects that client.
    /// Payloads that cannot go out as a text frame are dropped.
    pub fn dispatch(&self, user_id: UserId, payload: Bytes) -> bool {
        if let Err(e) = std::str::from_utf8(&payload) {
            telemetry::record_error("malformed_payload");
            warn!(user = user_id, error = %e, "Dropping payload that is not UTF-8");
            return false;
        }

        let overflowed = {
            let clients = self.clients.read();
            let Some(client) = clients.get(&user_id) else {
                trace!(user = user_id, "User not connected here, dropping");
                return false;
            };
            match client.try_enqueue(payload) {
                Ok(()) => return true,
                Err(EnqueueError::Closed) => return false,
                Err(EnqueueError::Full) => client.connection_id(),
            }
        };

        let mut clients = self.clients.write();
        let still_current = clients
            .get(&user_id)
            .is_some_and(|c| c.connection_id() == overflowed);
        if still_current {
            evict_locked(&mut clients, vec![user_id]);
        }
        false
    }

    /// Check if a user is connected to this process.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.clients.read().contains_key(&user_id)
    }

    /// Ids of users connected to this process, ascending.
    #[must_use]
    pub fn online_user_ids(&self) -> Vec<UserId> {
        sorted_ids(&self.clients.read())
    }

    /// Number of payloads queued for a user, if connected here.
    #[must_use]
    pub fn pending(&self, user_id: UserId) -> Option<usize> {
        self.clients.read().get(&user_id).map(Client::pending)
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let clients = self.clients.read();
        HubStats {
            online_count: clients.len(),
            queued_payloads: clients.values().map(Client::pending).sum(),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Number of connected users.
    pub online_count: usize,
    /// Payloads waiting across all queues.
    pub queued_payloads: usize,
}

fn sorted_ids(clients: &HashMap<UserId, Client>) -> Vec<UserId> {
    let mut ids: Vec<UserId> = clients.keys().copied().collect();
    ids.sort_unstable();
    ids
}

fn encode(event: &OutboundEvent) -> Option<Bytes> {
    match codec::encode_outbound(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            telemetry::record_error("serialization");
            error!(kind = %event.kind(), error = %e, "Failed to encode event");
            None
        }
    }
}

/// Queue `payload` for every client. Returns the users whose queues are full.
fn broadcast_locked(clients: &HashMap<UserId, Client>, payload: &Bytes) -> Vec<UserId> {
    clients
        .values()
        .filter(|c| c.try_enqueue(payload.clone()) == Err(EnqueueError::Full))
        .map(Client::user_id)
        .collect()
}

/// Remove slow consumers, closing their queues and announcing them offline.
/// The announcement can overflow further queues; those are evicted too.
fn evict_locked(clients: &mut HashMap<UserId, Client>, mut overflowed: Vec<UserId>) {
    while let Some(user_id) = overflowed.pop() {
        let Some(client) = clients.remove(&user_id) else {
            continue;
        };
        telemetry::record_queue_overflow();
        warn!(
            user = user_id,
            connection = %client.connection_id(),
            "Outbound queue full, disconnecting slow client"
        );
        drop(client);

        if let Some(payload) = encode(&OutboundEvent::offline(user_id)) {
            overflowed.extend(broadcast_locked(clients, &payload));
        }
    }
}

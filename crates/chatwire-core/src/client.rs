//! Client abstraction for chatwire.
//!
//! A client is the server-side record of one user's live connection: its
//! identity and a bounded FIFO of serialized outbound events. The [`Hub`]
//! owns the producing side; the connection's write loop owns the
//! [`ClientQueue`]. Dropping the [`Client`] closes the queue.
//!
//! [`Hub`]: crate::hub::Hub

use bytes::Bytes;
use chatwire_protocol::UserId;
use chatwire_transport::ConnectionId;
use tokio::sync::mpsc;

/// Default outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Identifies one registration: a user on a specific connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    /// The user.
    pub user_id: UserId,
    /// The physical connection carrying this registration.
    pub connection_id: ConnectionId,
}

/// Why a payload could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is at capacity.
    Full,
    /// The consuming write loop is gone.
    Closed,
}

/// The producing side of a user's outbound queue.
#[derive(Debug)]
pub struct Client {
    key: ClientKey,
    sender: mpsc::Sender<Bytes>,
    capacity: usize,
}

impl Client {
    /// Create a client and its queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(user_id: UserId, connection_id: ConnectionId, capacity: usize) -> (Self, ClientQueue) {
        let (sender, receiver) = mpsc::channel(capacity);
        let client = Self {
            key: ClientKey {
                user_id,
                connection_id,
            },
            sender,
            capacity,
        };
        (client, ClientQueue { receiver })
    }

    /// Get the registration key.
    #[must_use]
    pub fn key(&self) -> ClientKey {
        self.key
    }

    /// Get the user id.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.key.user_id
    }

    /// Get the connection id.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.key.connection_id
    }

    /// Number of payloads waiting to be written.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// Queue a payload without waiting.
    pub(crate) fn try_enqueue(&self, payload: Bytes) -> Result<(), EnqueueError> {
        self.sender.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

/// The consuming side of a user's outbound queue.
#[derive(Debug)]
pub struct ClientQueue {
    receiver: mpsc::Receiver<Bytes>,
}

impl ClientQueue {
    /// Wait for the next payload.
    ///
    /// Returns `None` once the queue has been closed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Take a payload if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }

    /// Number of payloads currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Whether the producing side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

//! Persistence collaborator.
//!
//! The router persists chat messages and read marks through
//! [`MessageStore`]. Durable backends live outside this crate;
//! [`MemoryMessageStore`] keeps everything in process.

use async_trait::async_trait;
use chatwire_protocol::{ChatMessage, MessageId, UserId};
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Chat message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new, unread message and return it with its id and
    /// creation time.
    async fn persist_message(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        content: &str,
    ) -> Result<ChatMessage, StoreError>;

    /// Mark every message from `from_user` to `to_user` as read.
    ///
    /// Returns the number of messages affected.
    async fn mark_read(&self, from_user: UserId, to_user: UserId) -> Result<u64, StoreError>;
}

/// In-process message store.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored message, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }

    /// Number of unread messages addressed to `user_id`.
    #[must_use]
    pub fn unread_count(&self, user_id: UserId) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.recipient_id == user_id && !m.is_read)
            .count()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn persist_message(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let mut messages = self.messages.lock();
        let message = ChatMessage {
            id: messages.len() as MessageId + 1,
            sender_id,
            recipient_id,
            content: content.to_string(),
            is_read: false,
            created_at: Utc::now(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn mark_read(&self, from_user: UserId, to_user: UserId) -> Result<u64, StoreError> {
        let mut affected = 0;
        for message in self.messages.lock().iter_mut() {
            if message.sender_id == from_user && message.recipient_id == to_user {
                message.is_read = true;
                affected += 1;
            }
        }
        Ok(affected)
    }
}

//! Inbound event routing.
//!
//! The router turns an inbound event from a connected user into storage
//! calls and outbound deliveries:
//!
//! - `chat` is persisted, then delivered to the recipient and echoed to the
//!   sender as confirmation
//! - `typing` is forwarded to the recipient only
//! - `read` marks the recipient's messages to the sender as read, then
//!   notifies that recipient
//!
//! Storage failures suppress delivery. Nothing is retried.

use async_trait::async_trait;
use chatwire_protocol::{codec, InboundEvent, MessageId, OutboundEvent, ProtocolError, UserId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::hub::Hub;
use crate::pump::InboundHandler;
use crate::store::{MessageStore, StoreError};
use crate::telemetry;

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Persistence failed; nothing was delivered.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Outbound event could not be serialized; nothing was delivered.
    #[error("Encoding error: {0}")]
    Encode(#[from] ProtocolError),
}

/// Routes inbound events to storage and the hub.
pub struct MessageRouter {
    hub: Arc<Hub>,
    store: Arc<dyn MessageStore>,
}

impl MessageRouter {
    /// Create a router.
    #[must_use]
    pub fn new(hub: Arc<Hub>, store: Arc<dyn MessageStore>) -> Self {
        Self { hub, store }
    }

    /// Route one event sent by `sender`.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence or encoding failed, in which case
    /// nothing was delivered.
    pub async fn route(&self, sender: UserId, event: InboundEvent) -> Result<(), RouterError> {
        match event {
            InboundEvent::Chat {
                content, recipient, ..
            } => self.route_chat(sender, recipient, &content).await,
            InboundEvent::Typing { recipient, .. } => self.route_typing(sender, recipient).await,
            InboundEvent::Read {
                recipient,
                message_id,
                ..
            } => self.route_read(sender, recipient, message_id).await,
        }
    }

    async fn route_chat(
        &self,
        sender: UserId,
        recipient: UserId,
        content: &str,
    ) -> Result<(), RouterError> {
        let message = self
            .store
            .persist_message(sender, recipient, content)
            .await?;
        debug!(
            message = message.id,
            sender = sender,
            recipient = recipient,
            "Chat message persisted"
        );

        let payload = codec::encode_outbound(&OutboundEvent::chat(message))?;
        self.hub.send_to_user(recipient, payload.clone()).await;
        self.hub.send_to_user(sender, payload).await;
        Ok(())
    }

    async fn route_typing(&self, sender: UserId, recipient: UserId) -> Result<(), RouterError> {
        let payload = codec::encode_outbound(&OutboundEvent::typing(sender))?;
        self.hub.send_to_user(recipient, payload).await;
        Ok(())
    }

    async fn route_read(
        &self,
        reader: UserId,
        author: UserId,
        message_id: Option<MessageId>,
    ) -> Result<(), RouterError> {
        let affected = self.store.mark_read(author, reader).await?;
        debug!(reader = reader, author = author, affected, "Messages marked read");

        let payload = codec::encode_outbound(&OutboundEvent::read(reader, message_id))?;
        self.hub.send_to_user(author, payload).await;
        Ok(())
    }
}

#[async_trait]
impl InboundHandler for MessageRouter {
    async fn handle(&self, sender: UserId, event: InboundEvent) {
        let kind = event.kind();
        if let Err(e) = self.route(sender, event).await {
            telemetry::record_error("route");
            warn!(user = sender, kind = %kind, error = %e, "Failed to route event");
        }
    }
}

//! Event types exchanged with chat clients.
//!
//! Inbound events are what a client sends over its connection. Outbound
//! events are what the server pushes back: chat deliveries, typing
//! indicators, read receipts and presence transitions.
//!
//! Both are JSON objects discriminated by a `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A user identifier.
pub type UserId = i64;

/// Identifier of a persisted chat message.
pub type MessageId = i64;

/// Event kinds as they appear in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Chat,
    Typing,
    Read,
    Online,
    Offline,
    Presence,
}

impl EventKind {
    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Chat => "chat",
            EventKind::Typing => "typing",
            EventKind::Read => "read",
            EventKind::Online => "online",
            EventKind::Offline => "offline",
            EventKind::Presence => "presence",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message as returned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Identifier assigned on persist.
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Addressee of the message.
    pub recipient_id: UserId,
    /// Free-text body.
    pub content: String,
    /// Whether the recipient has read it.
    pub is_read: bool,
    /// Creation time assigned on persist.
    pub created_at: DateTime<Utc>,
}

/// An event received from a client.
///
/// For `Read`, `recipient` names the user whose messages are being marked
/// as read, i.e. the original sender of those messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Send a chat message.
    Chat {
        /// Message body. Absent on the wire means empty.
        #[serde(default)]
        content: String,
        /// Addressee.
        recipient: UserId,
        /// Optional client-side message reference.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        /// Client timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },

    /// Typing indicator.
    Typing {
        /// User to notify.
        recipient: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },

    /// Read receipt.
    Read {
        /// Original sender of the messages being marked read.
        recipient: UserId,
        /// Optional reference to the last message seen.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl InboundEvent {
    /// Create a chat event.
    #[must_use]
    pub fn chat(recipient: UserId, content: impl Into<String>) -> Self {
        InboundEvent::Chat {
            content: content.into(),
            recipient,
            message_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a typing event.
    #[must_use]
    pub fn typing(recipient: UserId) -> Self {
        InboundEvent::Typing {
            recipient,
            message_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a read receipt for messages authored by `recipient`.
    #[must_use]
    pub fn read(recipient: UserId) -> Self {
        InboundEvent::Read {
            recipient,
            message_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Chat { .. } => EventKind::Chat,
            InboundEvent::Typing { .. } => EventKind::Typing,
            InboundEvent::Read { .. } => EventKind::Read,
        }
    }

    /// Get the target user id.
    #[must_use]
    pub fn recipient(&self) -> UserId {
        match self {
            InboundEvent::Chat { recipient, .. }
            | InboundEvent::Typing { recipient, .. }
            | InboundEvent::Read { recipient, .. } => *recipient,
        }
    }
}

/// An event pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    /// A persisted chat message, delivered to both parties.
    Chat {
        message: ChatMessage,
        sender_id: UserId,
        timestamp: DateTime<Utc>,
    },

    /// `sender_id` is typing.
    Typing {
        sender_id: UserId,
        timestamp: DateTime<Utc>,
    },

    /// `sender_id` has read the messages addressed to them.
    Read {
        sender_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        timestamp: DateTime<Utc>,
    },

    /// `sender_id` came online.
    Online {
        sender_id: UserId,
        timestamp: DateTime<Utc>,
    },

    /// `sender_id` went offline.
    Offline {
        sender_id: UserId,
        timestamp: DateTime<Utc>,
    },

    /// Full set of online users, sent once after registration.
    Presence {
        online_users: Vec<UserId>,
        timestamp: DateTime<Utc>,
    },
}

impl OutboundEvent {
    /// Create a chat delivery for a persisted message.
    #[must_use]
    pub fn chat(message: ChatMessage) -> Self {
        OutboundEvent::Chat {
            sender_id: message.sender_id,
            message,
            timestamp: Utc::now(),
        }
    }

    /// Create a typing indicator from `sender_id`.
    #[must_use]
    pub fn typing(sender_id: UserId) -> Self {
        OutboundEvent::Typing {
            sender_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a read receipt from `sender_id`.
    #[must_use]
    pub fn read(sender_id: UserId, message_id: Option<MessageId>) -> Self {
        OutboundEvent::Read {
            sender_id,
            message_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a presence-online transition.
    #[must_use]
    pub fn online(user_id: UserId) -> Self {
        OutboundEvent::Online {
            sender_id: user_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a presence-offline transition.
    #[must_use]
    pub fn offline(user_id: UserId) -> Self {
        OutboundEvent::Offline {
            sender_id: user_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a presence list.
    #[must_use]
    pub fn presence(online_users: Vec<UserId>) -> Self {
        OutboundEvent::Presence {
            online_users,
            timestamp: Utc::now(),
        }
    }

    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            OutboundEvent::Chat { .. } => EventKind::Chat,
            OutboundEvent::Typing { .. } => EventKind::Typing,
            OutboundEvent::Read { .. } => EventKind::Read,
            OutboundEvent::Online { .. } => EventKind::Online,
            OutboundEvent::Offline { .. } => EventKind::Offline,
            OutboundEvent::Presence { .. } => EventKind::Presence,
        }
    }

    /// Get the originating user, if the event carries one.
    #[must_use]
    pub fn sender_id(&self) -> Option<UserId> {
        match self {
            OutboundEvent::Chat { sender_id, .. }
            | OutboundEvent::Typing { sender_id, .. }
            | OutboundEvent::Read { sender_id, .. }
            | OutboundEvent::Online { sender_id, .. }
            | OutboundEvent::Offline { sender_id, .. } => Some(*sender_id),
            OutboundEvent::Presence { .. } => None,
        }
    }
}

//! # chatwire-protocol
//!
//! Wire protocol definitions for the chatwire realtime chat router.
//!
//! This crate defines the JSON events exchanged with clients, the envelope
//! carried on the shared pub/sub topic, and the codec that ties them to
//! bytes.
//!
//! ## Event Kinds
//!
//! - `chat` / `typing` / `read` - Client to server, and echoed back out
//! - `online` / `offline` - Presence transitions
//! - `presence` - Full online list, sent on connect
//!
//! ## Example
//!
//! ```rust
//! use chatwire_protocol::{codec, InboundEvent};
//!
//! let event = codec::decode_inbound(br#"{"type":"chat","content":"hi","recipient":2}"#).unwrap();
//! assert_eq!(event.recipient(), 2);
//! ```

pub mod codec;
pub mod envelope;
pub mod events;

pub use codec::{decode_inbound, encode_outbound, ProtocolError, MAX_FRAME_SIZE};
pub use envelope::{Envelope, DEFAULT_TOPIC};
pub use events::{ChatMessage, EventKind, InboundEvent, MessageId, OutboundEvent, UserId};

//! # chatwire-core
//!
//! Connection handling and message routing for the chatwire chat service.
//!
//! This crate provides the pieces between an authenticated connection and
//! the users it talks to:
//!
//! - **Pump** - runs the read and write sides of one connection
//! - **Hub** - process-local registry of connected users and their presence
//! - **Broker** - envelope fan-out over a shared pub/sub fabric, so a user
//!   can be reached from any process
//! - **Router** - turns inbound events into storage calls and deliveries
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Pump     │────▶│   Router    │────▶│    Hub      │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//!        │            ┌─────────────┐     ┌─────────────┐
//!        │            │ MessageStore│     │   Broker    │
//!        │            └─────────────┘     └─────────────┘
//!        │                                       │
//!        └──────── client queue ◀── dispatch ◀───┘
//! ```
//!
//! Every delivery goes through the broker, including deliveries to users
//! connected to the same process.

pub mod auth;
pub mod broker;
pub mod client;
pub mod hub;
pub mod pubsub;
pub mod pump;
pub mod router;
pub mod store;
pub mod telemetry;

pub use auth::{AuthError, TokenValidator};
pub use broker::Broker;
pub use client::{Client, ClientKey, ClientQueue, DEFAULT_QUEUE_CAPACITY};
pub use hub::{Hub, HubConfig, HubStats};
pub use pubsub::{BrokerError, MemoryPubSub, PubSub};
pub use pump::{Disconnect, InboundHandler, Pump, PumpConfig};
pub use router::{MessageRouter, RouterError};
pub use store::{MemoryMessageStore, MessageStore, StoreError};

#[cfg(feature = "redis")]
pub use pubsub::RedisPubSub;

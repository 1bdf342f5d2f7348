//! # chatwire-transport
//!
//! Transport abstraction layer for chatwire.
//!
//! - **WebSocket** - upgraded axum sockets
//! - **Memory** - in-process connection pairs, for tests and embedding
//!
//! ## Transport Abstraction
//!
//! All transports implement [`Connection`], which splits into a
//! [`FrameReader`] and a [`FrameWriter`] so that reading and writing can be
//! driven by separate tasks.
//!
//! ```rust,ignore
//! use chatwire_transport::{Connection, WireFrame};
//!
//! async fn echo(conn: Box<dyn Connection>) {
//!     let (mut reader, mut writer) = conn.split();
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         if writer.send(frame).await.is_err() {
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;
pub mod websocket;

pub use traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError, WireFrame};
pub use websocket::WebSocketConnection;

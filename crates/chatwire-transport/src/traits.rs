//! Transport abstraction traits for chatwire.
//!
//! A [`Connection`] is one physical duplex link to a client. It is split
//! into a [`FrameReader`] and a [`FrameWriter`] so the read and write sides
//! can run as independent tasks.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 data frame.
    Text(Bytes),
    /// Binary data frame.
    Binary(Bytes),
    /// Liveness probe.
    Ping(Bytes),
    /// Liveness acknowledgment.
    Pong(Bytes),
    /// Close handshake.
    Close,
}

impl WireFrame {
    /// Create a text frame.
    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        WireFrame::Text(data.into())
    }

    /// Get the payload of a data frame.
    #[must_use]
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            WireFrame::Text(data) | WireFrame::Binary(data) => Some(data),
            _ => None,
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The receiving half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` once the peer has gone away.
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError>;
}

/// The sending half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one frame.
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError>;

    /// Shut the sending half down. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An established physical connection.
pub trait Connection: Send {
    /// Get the connection's identifier.
    fn id(&self) -> ConnectionId;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Split into independently owned read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);
}

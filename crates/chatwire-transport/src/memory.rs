//! In-memory connections.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] and the client-side
//! [`MemoryPeer`] that drives it. Dropping the peer looks like a vanished
//! client to the server: reads end and writes fail.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError, WireFrame};

/// Create a connected server/client pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_server) = mpsc::unbounded_channel();
    let id = ConnectionId::generate();

    (
        MemoryConnection {
            id,
            inbound: from_peer,
            outbound: to_peer,
        },
        MemoryPeer {
            id,
            outbound: Some(to_server),
            inbound: from_server,
        },
    )
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<WireFrame>,
    outbound: mpsc::UnboundedSender<WireFrame>,
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (
            Box::new(MemoryReader {
                inbound: self.inbound,
            }),
            Box::new(MemoryWriter {
                outbound: Some(self.outbound),
            }),
        )
    }
}

struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<WireFrame>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError> {
        Ok(self.inbound.recv().await)
    }
}

struct MemoryWriter {
    outbound: Option<mpsc::UnboundedSender<WireFrame>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        Ok(())
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    id: ConnectionId,
    outbound: Option<mpsc::UnboundedSender<WireFrame>>,
    inbound: mpsc::UnboundedReceiver<WireFrame>,
}

impl MemoryPeer {
    /// The id of the server-side connection.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer hung up or the server side is gone.
    pub fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone.
    pub fn send_text(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send(WireFrame::Text(data.into()))
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server side has closed.
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.inbound.recv().await
    }

    /// Receive a frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<WireFrame> {
        self.inbound.try_recv().ok()
    }

    /// Stop sending. The server's reader sees end-of-stream; frames from the
    /// server can still be received.
    pub fn hang_up(&mut self) {
        self.outbound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (conn, mut peer) = pair();
        assert_eq!(conn.id(), peer.connection_id());
        let (mut reader, mut writer) = Box::new(conn).split();

        peer.send_text("hello").unwrap();
        assert_eq!(reader.recv().await.unwrap(), Some(WireFrame::text("hello")));

        writer.send(WireFrame::text("world")).await.unwrap();
        assert_eq!(peer.recv().await, Some(WireFrame::text("world")));
    }

    #[tokio::test]
    async fn test_hang_up_ends_reader() {
        let (conn, mut peer) = pair();
        let (mut reader, _writer) = Box::new(conn).split();

        peer.hang_up();
        assert_eq!(reader.recv().await.unwrap(), None);
        assert!(peer.send_text("late").is_err());
    }

    #[tokio::test]
    async fn test_writer_fails_after_peer_dropped() {
        let (conn, peer) = pair();
        let (_reader, mut writer) = Box::new(conn).split();

        drop(peer);
        assert!(matches!(
            writer.send(WireFrame::text("x")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_close_ends_peer_stream() {
        let (conn, mut peer) = pair();
        let (_reader, mut writer) = Box::new(conn).split();

        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(peer.recv().await, None);
    }
}

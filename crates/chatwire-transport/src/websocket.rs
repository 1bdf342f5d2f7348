//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] to the [`Connection`] traits.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::debug;

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError, WireFrame};

/// An upgraded WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            remote_addr: None,
        }
    }

    /// Record the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl Connection for WebSocketConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|a| a.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(WebSocketReader {
                id: self.id,
                stream,
            }),
            Box::new(WebSocketWriter {
                id: self.id,
                sink,
                closed: false,
            }),
        )
    }
}

/// Read half of a [`WebSocketConnection`].
pub struct WebSocketReader {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(message)) => Ok(Some(from_message(message))),
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!(connection = %self.id, "WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

/// Write half of a [`WebSocketConnection`].
pub struct WebSocketWriter {
    id: ConnectionId,
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let message = into_message(frame)?;
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        debug!(connection = %self.id, "Closing WebSocket");
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}

fn from_message(message: Message) -> WireFrame {
    match message {
        Message::Text(text) => WireFrame::Text(Bytes::from(text)),
        Message::Binary(data) => WireFrame::Binary(Bytes::from(data)),
        Message::Ping(data) => WireFrame::Ping(Bytes::from(data)),
        Message::Pong(data) => WireFrame::Pong(Bytes::from(data)),
        Message::Close(_) => WireFrame::Close,
    }
}

fn into_message(frame: WireFrame) -> Result<Message, TransportError> {
    Ok(match frame {
        WireFrame::Text(data) => Message::Text(
            String::from_utf8(data.to_vec())
                .map_err(|e| TransportError::SendFailed(e.to_string()))?,
        ),
        WireFrame::Binary(data) => Message::Binary(data.to_vec()),
        WireFrame::Ping(data) => Message::Ping(data.to_vec()),
        WireFrame::Pong(data) => Message::Pong(data.to_vec()),
        WireFrame::Close => Message::Close(None),
    })
}

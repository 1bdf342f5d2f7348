//! Connection pump.
//!
//! One pump drives one authenticated connection. It registers the user with
//! the [`Hub`], then runs two tasks:
//!
//! - the read loop enforces the frame size limit and the liveness deadline,
//!   decodes inbound events and hands them to an [`InboundHandler`]
//! - the write loop drains the client's queue onto the wire, coalescing
//!   whatever is already queued into one frame, and sends a ping every
//!   `ping_period`
//!
//! Whichever loop exits first ends the connection. The other loop is
//! stopped and the hub is asked to unregister exactly once.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chatwire_protocol::{codec, InboundEvent, UserId, MAX_FRAME_SIZE};
use chatwire_transport::{Connection, FrameReader, FrameWriter, WireFrame};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::client::{ClientKey, ClientQueue};
use crate::hub::Hub;
use crate::telemetry;

/// Liveness and framing limits for a pump.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// How long the peer may go without acknowledging a ping.
    pub pong_wait: Duration,
    /// Interval between pings. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Deadline for writing a single frame.
    pub write_wait: Duration,
    /// Largest inbound data frame accepted, in bytes.
    pub max_frame_size: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Receives decoded inbound events.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one event sent by `user_id`.
    async fn handle(&self, user_id: UserId, event: InboundEvent);
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The peer closed the connection.
    PeerClosed,
    /// No pong within `pong_wait`.
    LivenessTimeout,
    /// The peer sent a frame over the size limit.
    FrameTooLarge,
    /// Reading from the transport failed.
    ReadFailed,
    /// Writing to the transport failed.
    WriteFailed,
    /// A write did not finish within `write_wait`.
    WriteTimeout,
    /// The hub closed the queue: replaced, evicted or unregistered.
    QueueClosed,
}

impl Disconnect {
    /// Get the reason as a static label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Disconnect::PeerClosed => "peer_closed",
            Disconnect::LivenessTimeout => "liveness_timeout",
            Disconnect::FrameTooLarge => "frame_too_large",
            Disconnect::ReadFailed => "read_failed",
            Disconnect::WriteFailed => "write_failed",
            Disconnect::WriteTimeout => "write_timeout",
            Disconnect::QueueClosed => "queue_closed",
        }
    }
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives authenticated connections.
#[derive(Clone)]
pub struct Pump {
    hub: Arc<Hub>,
    handler: Arc<dyn InboundHandler>,
    config: PumpConfig,
}

impl Pump {
    /// Create a pump with default limits.
    #[must_use]
    pub fn new(hub: Arc<Hub>, handler: Arc<dyn InboundHandler>) -> Self {
        Self::with_config(hub, handler, PumpConfig::default())
    }

    /// Create a pump with custom limits.
    #[must_use]
    pub fn with_config(hub: Arc<Hub>, handler: Arc<dyn InboundHandler>, config: PumpConfig) -> Self {
        Self {
            hub,
            handler,
            config,
        }
    }

    /// Get the pump limits.
    #[must_use]
    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    /// Register `user_id` on `connection` and pump frames until it ends.
    ///
    /// Returns once both loops have stopped and the hub has been told the
    /// connection is gone.
    pub async fn run(&self, connection: Box<dyn Connection>, user_id: UserId) -> Disconnect {
        let connection_id = connection.id();
        let remote = connection.remote_addr();
        let (reader, writer) = connection.split();
        let (key, queue) = self.hub.connect(user_id, connection_id);
        info!(
            user = user_id,
            connection = %connection_id,
            remote = ?remote,
            "Connection pump started"
        );

        let mut write_task = tokio::spawn(write_loop(writer, queue, self.config.clone(), key));
        let mut read_task = tokio::spawn(read_loop(
            reader,
            self.handler.clone(),
            self.config.clone(),
            key,
        ));

        let reason = tokio::select! {
            result = &mut read_task => {
                let reason = result.unwrap_or(Disconnect::ReadFailed);
                // Unregistering closes the queue, which ends the write loop.
                self.hub.unregister(key);
                let _ = write_task.await;
                reason
            }
            result = &mut write_task => {
                let reason = result.unwrap_or(Disconnect::WriteFailed);
                read_task.abort();
                let _ = read_task.await;
                self.hub.unregister(key);
                reason
            }
        };

        info!(
            user = user_id,
            connection = %connection_id,
            reason = %reason,
            "Connection pump stopped"
        );
        reason
    }
}

async fn read_loop(
    mut reader: Box<dyn FrameReader>,
    handler: Arc<dyn InboundHandler>,
    config: PumpConfig,
    key: ClientKey,
) -> Disconnect {
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let frame = match timeout_at(deadline, reader.recv()).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => return Disconnect::PeerClosed,
            Ok(Err(e)) => {
                telemetry::record_error("transport");
                debug!(user = key.user_id, connection = %key.connection_id, error = %e, "Read failed");
                return Disconnect::ReadFailed;
            }
            Err(_) => {
                warn!(
                    user = key.user_id,
                    connection = %key.connection_id,
                    "No pong within {:?}, closing",
                    config.pong_wait
                );
                return Disconnect::LivenessTimeout;
            }
        };

        let data = match frame {
            WireFrame::Text(data) | WireFrame::Binary(data) => data,
            WireFrame::Pong(_) => {
                deadline = Instant::now() + config.pong_wait;
                trace!(user = key.user_id, "Pong received");
                continue;
            }
            WireFrame::Ping(_) => continue,
            WireFrame::Close => return Disconnect::PeerClosed,
        };

        if let Err(e) = codec::check_frame_size(data.len(), config.max_frame_size) {
            telemetry::record_error("frame_too_large");
            warn!(user = key.user_id, connection = %key.connection_id, error = %e, "Closing connection");
            return Disconnect::FrameTooLarge;
        }

        let event = match codec::decode_inbound(&data) {
            Ok(event) => event,
            Err(e) => {
                telemetry::record_error("malformed");
                debug!(user = key.user_id, error = %e, "Skipping malformed frame");
                continue;
            }
        };

        telemetry::record_message("inbound");
        handler.handle(key.user_id, event).await;
    }
}

async fn write_loop(
    mut writer: Box<dyn FrameWriter>,
    mut queue: ClientQueue,
    config: PumpConfig,
    key: ClientKey,
) -> Disconnect {
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            payload = queue.recv() => {
                let Some(first) = payload else {
                    // Best effort: the peer may already be gone.
                    let _ = write_frame(writer.as_mut(), WireFrame::Close, config.write_wait).await;
                    break Disconnect::QueueClosed;
                };
                let batch = coalesce(first, &mut queue);
                if let Err(reason) = write_frame(writer.as_mut(), WireFrame::Text(batch), config.write_wait).await {
                    break reason;
                }
                telemetry::record_message("outbound");
            }
            _ = ticker.tick() => {
                if let Err(reason) = write_frame(writer.as_mut(), WireFrame::Ping(Bytes::new()), config.write_wait).await {
                    break reason;
                }
                trace!(user = key.user_id, "Ping sent");
            }
        }
    };

    if let Err(e) = writer.close().await {
        trace!(user = key.user_id, error = %e, "Close after write loop failed");
    }
    debug!(user = key.user_id, connection = %key.connection_id, reason = %reason, "Write loop stopped");
    reason
}

/// Join `first` with whatever is queued right now. Later arrivals wait for
/// the next frame.
fn coalesce(first: Bytes, queue: &mut ClientQueue) -> Bytes {
    let queued = queue.len();
    if queued == 0 {
        return first;
    }

    let mut batch = BytesMut::from(&first[..]);
    for _ in 0..queued {
        match queue.try_recv() {
            Some(payload) => codec::append_to_batch(&mut batch, &payload),
            None => break,
        }
    }
    batch.freeze()
}

async fn write_frame(
    writer: &mut dyn FrameWriter,
    frame: WireFrame,
    wait: Duration,
) -> Result<(), Disconnect> {
    match timeout(wait, writer.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "Write failed");
            Err(Disconnect::WriteFailed)
        }
        Err(_) => Err(Disconnect::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::router::MessageRouter;
    use crate::store::MemoryMessageStore;
    use chatwire_protocol::codec::{decode_outbound_batch, encode_inbound};
    use chatwire_protocol::{EventKind, OutboundEvent};
    use chatwire_transport::memory::{self, MemoryPeer};
    use chatwire_transport::ConnectionId;
    use tokio::task::JoinHandle;

    async fn setup() -> (Arc<Hub>, Pump) {
        let hub = Arc::new(Hub::new(Broker::memory()));
        hub.start().await.unwrap();
        let router = Arc::new(MessageRouter::new(
            hub.clone(),
            Arc::new(MemoryMessageStore::new()),
        ));
        let pump = Pump::new(hub.clone(), router);
        (hub, pump)
    }

    fn spawn_run(pump: &Pump, user_id: UserId) -> (JoinHandle<Disconnect>, MemoryPeer) {
        let (conn, peer) = memory::pair();
        let pump = pump.clone();
        let handle = tokio::spawn(async move { pump.run(Box::new(conn), user_id).await });
        (handle, peer)
    }

    async fn next_events(peer: &mut MemoryPeer) -> Vec<OutboundEvent> {
        loop {
            match peer.recv().await {
                Some(WireFrame::Text(data)) => return decode_outbound_batch(&data).unwrap(),
                Some(_) => continue,
                None => panic!("Connection closed while waiting for events"),
            }
        }
    }

    #[test]
    fn test_default_limits() {
        let config = PumpConfig::default();
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.ping_period, Duration::from_secs(54));
        assert_eq!(config.write_wait, Duration::from_secs(10));
        assert_eq!(config.max_frame_size, 512);
    }

    #[tokio::test]
    async fn test_greeting_is_coalesced_into_one_frame() {
        let (hub, pump) = setup().await;
        let (run, mut peer) = spawn_run(&pump, 1);

        let kinds: Vec<EventKind> = next_events(&mut peer)
            .await
            .iter()
            .map(OutboundEvent::kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::Presence, EventKind::Online]);
        assert!(hub.is_online(1));

        peer.hang_up();
        assert_eq!(run.await.unwrap(), Disconnect::PeerClosed);
        assert!(!hub.is_online(1));
        assert_eq!(peer.recv().await, Some(WireFrame::Close));
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (hub, pump) = setup().await;
        let (run, mut peer) = spawn_run(&pump, 1);
        next_events(&mut peer).await;

        peer.send_text("not json").unwrap();
        peer.send_text(r#"{"type":"shout","recipient":1}"#).unwrap();
        peer.send_text(encode_inbound(&InboundEvent::typing(1)).unwrap())
            .unwrap();

        let events = next_events(&mut peer).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            OutboundEvent::Typing { sender_id, .. } => assert_eq!(*sender_id, 1),
            other => panic!("Expected typing, got {:?}", other),
        }
        assert!(hub.is_online(1));

        peer.hang_up();
        assert_eq!(run.await.unwrap(), Disconnect::PeerClosed);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (hub, pump) = setup().await;
        let (run, mut peer) = spawn_run(&pump, 1);
        next_events(&mut peer).await;

        peer.send_text("x".repeat(513)).unwrap();
        assert_eq!(run.await.unwrap(), Disconnect::FrameTooLarge);
        assert!(!hub.is_online(1));
    }

    #[tokio::test]
    async fn test_frame_at_limit_is_accepted() {
        let (_hub, pump) = setup().await;
        let (run, mut peer) = spawn_run(&pump, 1);
        next_events(&mut peer).await;

        let mut frame = encode_inbound(&InboundEvent::typing(1)).unwrap().to_vec();
        frame.resize(512, b' ');
        peer.send_text(frame).unwrap();
        assert_eq!(next_events(&mut peer).await[0].kind(), EventKind::Typing);

        peer.hang_up();
        assert_eq!(run.await.unwrap(), Disconnect::PeerClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_torn_down() {
        let (hub, pump) = setup().await;
        let (conn, mut peer) = memory::pair();
        let started = Instant::now();

        let reason = pump.run(Box::new(conn), 1).await;
        assert_eq!(reason, Disconnect::LivenessTimeout);
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(!hub.is_online(1));
        assert!(hub.online_user_ids().is_empty());

        let mut frames = Vec::new();
        while let Some(frame) = peer.recv().await {
            frames.push(frame);
        }
        assert!(matches!(frames[0], WireFrame::Text(_)));
        assert!(frames.contains(&WireFrame::Ping(Bytes::new())));
        assert_eq!(frames.last(), Some(&WireFrame::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pongs_keep_connection_alive() {
        let (hub, pump) = setup().await;
        let (run, mut peer) = spawn_run(&pump, 1);

        let responder = tokio::spawn(async move {
            let mut pings = 0;
            while let Some(frame) = peer.recv().await {
                if let WireFrame::Ping(data) = frame {
                    pings += 1;
                    if peer.send(WireFrame::Pong(data)).is_err() {
                        break;
                    }
                }
            }
            pings
        });

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(hub.is_online(1));

        // A second connection for the same user replaces this one.
        let (_key, _queue) = hub.connect(1, ConnectionId::generate());
        assert_eq!(run.await.unwrap(), Disconnect::QueueClosed);
        assert!(responder.await.unwrap() >= 5);
        assert!(hub.is_online(1));
    }
}

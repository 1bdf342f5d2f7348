//! End-to-end routing through pumps, hubs and a shared fabric.
//!
//! Each `Node` stands in for one server process. Nodes share a
//! `MemoryPubSub` the way real processes share an external channel.

use chatwire_core::{
    Broker, Disconnect, Hub, MemoryMessageStore, MemoryPubSub, MessageRouter, MessageStore, PubSub,
    Pump,
};
use chatwire_protocol::codec::{decode_outbound_batch, encode_inbound};
use chatwire_protocol::{EventKind, InboundEvent, OutboundEvent, UserId};
use chatwire_transport::memory::{self, MemoryPeer};
use chatwire_transport::WireFrame;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Node {
    hub: Arc<Hub>,
    pump: Pump,
}

impl Node {
    async fn start(fabric: &Arc<dyn PubSub>, store: &Arc<MemoryMessageStore>) -> Self {
        let hub = Arc::new(Hub::new(Broker::new(fabric.clone())));
        hub.start().await.unwrap();
        let router = Arc::new(MessageRouter::new(hub.clone(), store.clone()));
        Self {
            pump: Pump::new(hub.clone(), router),
            hub,
        }
    }
}

struct TestClient {
    user_id: UserId,
    peer: MemoryPeer,
    run: JoinHandle<Disconnect>,
    pending: VecDeque<OutboundEvent>,
}

impl TestClient {
    /// Connect and consume the greeting up to our own online event.
    async fn connect(node: &Node, user_id: UserId) -> Self {
        let (conn, peer) = memory::pair();
        let pump = node.pump.clone();
        let run = tokio::spawn(async move { pump.run(Box::new(conn), user_id).await });

        let mut client = Self {
            user_id,
            peer,
            run,
            pending: VecDeque::new(),
        };
        assert_eq!(client.next_event().await.kind(), EventKind::Presence);
        client.expect_presence(EventKind::Online, user_id).await;
        client
    }

    fn send(&self, event: InboundEvent) {
        self.peer.send_text(encode_inbound(&event).unwrap()).unwrap();
    }

    async fn next_event(&mut self) -> OutboundEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            let frame = timeout(Duration::from_secs(5), self.peer.recv())
                .await
                .unwrap_or_else(|_| panic!("user {} timed out waiting for an event", self.user_id));
            match frame {
                Some(WireFrame::Text(data)) => {
                    self.pending.extend(decode_outbound_batch(&data).unwrap());
                }
                Some(_) => {}
                None => panic!("user {} was disconnected", self.user_id),
            }
        }
    }

    async fn expect_presence(&mut self, kind: EventKind, user_id: UserId) {
        let event = self.next_event().await;
        assert_eq!(event.kind(), kind);
        assert_eq!(event.sender_id(), Some(user_id));
    }

    async fn disconnect(mut self) -> Disconnect {
        self.peer.hang_up();
        self.run.await.unwrap()
    }
}

fn shared_fabric() -> Arc<dyn PubSub> {
    Arc::new(MemoryPubSub::new())
}

#[tokio::test]
async fn test_chat_reaches_recipient_on_another_process() {
    let fabric = shared_fabric();
    let store = Arc::new(MemoryMessageStore::new());
    let node_a = Node::start(&fabric, &store).await;
    let node_b = Node::start(&fabric, &store).await;

    let mut alice = TestClient::connect(&node_a, 1).await;
    let mut bob = TestClient::connect(&node_b, 2).await;

    alice.send(InboundEvent::chat(2, "hi"));

    let mut ids = Vec::new();
    for client in [&mut bob, &mut alice] {
        match client.next_event().await {
            OutboundEvent::Chat {
                message, sender_id, ..
            } => {
                assert_eq!(sender_id, 1);
                assert_eq!(message.content, "hi");
                ids.push(message.id);
            }
            other => panic!("Expected chat, got {:?}", other),
        }
    }

    let stored = store.messages();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sender_id, 1);
    assert_eq!(stored[0].recipient_id, 2);
    assert_eq!(stored[0].content, "hi");
    assert!(!stored[0].is_read);
    assert_eq!(ids, vec![stored[0].id, stored[0].id]);

    assert_eq!(alice.disconnect().await, Disconnect::PeerClosed);
    assert_eq!(bob.disconnect().await, Disconnect::PeerClosed);
    assert!(node_a.hub.online_user_ids().is_empty());
    assert!(node_b.hub.online_user_ids().is_empty());
}

#[tokio::test]
async fn test_chat_to_absent_user_is_persisted_but_not_delivered() {
    let fabric = shared_fabric();
    let store = Arc::new(MemoryMessageStore::new());
    let node_a = Node::start(&fabric, &store).await;
    let node_b = Node::start(&fabric, &store).await;

    let mut alice = TestClient::connect(&node_a, 1).await;
    let mut bob = TestClient::connect(&node_b, 2).await;

    alice.send(InboundEvent::chat(99, "anyone?"));
    // Markers, published after the chat by the same read loop.
    alice.send(InboundEvent::typing(2));
    alice.send(InboundEvent::typing(1));

    for client in [&mut bob, &mut alice] {
        match client.next_event().await {
            OutboundEvent::Typing { sender_id, .. } => assert_eq!(sender_id, 1),
            other => panic!("Expected typing marker, got {:?}", other),
        }
    }

    let stored = store.messages();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].recipient_id, 99);
}

#[tokio::test]
async fn test_read_receipt_marks_and_notifies_author() {
    let fabric = shared_fabric();
    let store = Arc::new(MemoryMessageStore::new());
    store.persist_message(2, 1, "first").await.unwrap();
    store.persist_message(2, 1, "second").await.unwrap();
    store.persist_message(1, 2, "reply").await.unwrap();

    let node_a = Node::start(&fabric, &store).await;
    let node_b = Node::start(&fabric, &store).await;
    let alice = TestClient::connect(&node_a, 1).await;
    let mut bob = TestClient::connect(&node_b, 2).await;

    alice.send(InboundEvent::read(2));

    match bob.next_event().await {
        OutboundEvent::Read { sender_id, .. } => assert_eq!(sender_id, 1),
        other => panic!("Expected read receipt, got {:?}", other),
    }
    assert_eq!(store.unread_count(1), 0);
    assert_eq!(store.unread_count(2), 1);
}

#[tokio::test]
async fn test_presence_on_one_process() {
    let fabric = shared_fabric();
    let store = Arc::new(MemoryMessageStore::new());
    let node = Node::start(&fabric, &store).await;

    let mut alice = TestClient::connect(&node, 1).await;

    let (conn, peer) = memory::pair();
    let pump = node.pump.clone();
    let run = tokio::spawn(async move { pump.run(Box::new(conn), 2).await });
    let mut bob = TestClient {
        user_id: 2,
        peer,
        run,
        pending: VecDeque::new(),
    };

    match bob.next_event().await {
        OutboundEvent::Presence { online_users, .. } => assert_eq!(online_users, vec![1, 2]),
        other => panic!("Expected presence list, got {:?}", other),
    }
    alice.expect_presence(EventKind::Online, 2).await;
    assert_eq!(node.hub.online_user_ids(), vec![1, 2]);

    assert_eq!(bob.disconnect().await, Disconnect::PeerClosed);
    alice.expect_presence(EventKind::Offline, 2).await;
    assert_eq!(node.hub.online_user_ids(), vec![1]);
}

#[tokio::test]
async fn test_reconnect_replaces_previous_connection() {
    let fabric = shared_fabric();
    let store = Arc::new(MemoryMessageStore::new());
    let node = Node::start(&fabric, &store).await;

    let first = TestClient::connect(&node, 1).await;
    let mut second = TestClient::connect(&node, 1).await;

    assert_eq!(first.run.await.unwrap(), Disconnect::QueueClosed);
    assert_eq!(node.hub.online_user_ids(), vec![1]);

    // The stale connection's teardown did not announce the user offline.
    second.send(InboundEvent::typing(1));
    assert_eq!(second.next_event().await.kind(), EventKind::Typing);
    assert!(node.hub.is_online(1));
}

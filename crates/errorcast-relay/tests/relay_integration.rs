#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end relay flows with an in-memory transport and broker.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use errorcast_channels::{Channel, ChannelEvent, ChannelMessage, InboundMessage};
use errorcast_core::{ChatId, Event, ParseMode, RelayError, RelayResult, Tier};
use errorcast_listener::{Broker, ListenerState, ReconnectPolicy, Subscription};
use errorcast_relay::{RelayConfig, RelayCoordinator};
use errorcast_session::{SessionState, SnapshotFile};
use tempfile::TempDir;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<ChannelMessage>>,
    failing: AtomicBool,
}

impl Recorder {
    fn sent(&self) -> Vec<ChannelMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.content).collect()
    }
}

#[async_trait]
impl Channel for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn send(&self, message: ChannelMessage) -> RelayResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RelayError::Channel("network unreachable".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Broker fed from a queue the test publishes into.
struct QueueBroker {
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

struct QueueSubscription {
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

fn queue_broker() -> (mpsc::UnboundedSender<Vec<u8>>, Arc<QueueBroker>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let broker = QueueBroker {
        queue: Arc::new(tokio::sync::Mutex::new(rx)),
    };
    (tx, Arc::new(broker))
}

#[async_trait]
impl Broker for QueueBroker {
    async fn subscribe(&self, _channel: &str) -> RelayResult<Box<dyn Subscription>> {
        Ok(Box::new(QueueSubscription {
            queue: self.queue.clone(),
        }))
    }
}

#[async_trait]
impl Subscription for QueueSubscription {
    async fn next_message(&mut self, wait: Duration) -> RelayResult<Option<Vec<u8>>> {
        let mut queue = self.queue.lock().await;
        match tokio::time::timeout(wait, queue.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(payload)) => Ok(Some(payload)),
            Ok(None) => Err(RelayError::Broker("publisher gone".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const PASSWORD: &str = "correct-horse";

fn relay_config(dir: &TempDir) -> RelayConfig {
    let mut config = RelayConfig::new(dir.path(), PASSWORD);
    config.autosave = Duration::from_secs(3600);
    config.listener.poll_wait = Duration::from_millis(10);
    config.listener.reconnect = ReconnectPolicy::fixed(Duration::from_millis(10));
    config
}

fn inbound(chat_id: i64, text: &str) -> InboundMessage {
    InboundMessage {
        chat_id: ChatId(chat_id),
        sender_id: Some(chat_id),
        text: text.to_string(),
    }
}

fn event(content: &str, status: u16) -> Vec<u8> {
    Event::new(content)
        .with_uri("/api/orders")
        .with_status(status)
        .encode()
        .unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_flow() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(Recorder::default());
    let (_publish, broker) = queue_broker();
    let relay = RelayCoordinator::new(relay_config(&dir), transport.clone(), broker);
    let store = relay.store();

    relay.handle_message(inbound(42, "/start")).await;
    assert_eq!(transport.texts().last().unwrap(), "Please type access password:");

    relay.handle_message(inbound(42, "wrong")).await;
    assert_eq!(transport.texts().last().unwrap(), "Wrong password :(");
    assert_eq!(store.get(ChatId(42)).await.state(), SessionState::Unauthenticated);

    relay.handle_message(inbound(42, PASSWORD)).await;
    let welcome = transport.sent().pop().unwrap();
    assert!(welcome.content.starts_with("You successfully logged in."));
    assert_eq!(welcome.parse_mode, ParseMode::Markdown);
    assert_eq!(store.get(ChatId(42)).await.state(), SessionState::Authorized);
}

#[tokio::test]
async fn test_free_text_gets_no_reply() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(Recorder::default());
    let (_publish, broker) = queue_broker();
    let relay = RelayCoordinator::new(relay_config(&dir), transport.clone(), broker);

    relay.handle_message(inbound(7, PASSWORD)).await;
    relay.handle_message(inbound(7, "hello there, anyone?")).await;
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_failed_reply_keeps_new_state() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(Recorder::default());
    transport.failing.store(true, Ordering::SeqCst);
    let (_publish, broker) = queue_broker();
    let relay = RelayCoordinator::new(relay_config(&dir), transport.clone(), broker);

    relay.handle_message(inbound(5, PASSWORD)).await;
    assert_eq!(relay.store().get(ChatId(5)).await.state(), SessionState::Authorized);
}

#[tokio::test]
async fn test_events_reach_only_matching_listeners() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(Recorder::default());
    let (publish, broker) = queue_broker();
    let relay = Arc::new(RelayCoordinator::new(
        relay_config(&dir),
        transport.clone(),
        broker,
    ));
    let store = relay.store();

    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let handle = relay.start(inbound_rx);

    for text in ["/start", PASSWORD, "/listen server-error"] {
        inbound_tx
            .send(ChannelEvent::MessageReceived(inbound(42, text)))
            .await
            .unwrap();
    }
    // A second chat that never logs in.
    inbound_tx
        .send(ChannelEvent::MessageReceived(inbound(99, "/listen")))
        .await
        .unwrap();

    wait_until(|| transport.sent().len() >= 4).await;
    assert_eq!(store.subscribers(Tier::ServerError).await, vec![ChatId(42)]);
    assert_eq!(
        transport.texts().last().unwrap(),
        "Unknown command /listen"
    );
    let replies = transport.sent().len();

    publish.send(event("Not Found", 404)).unwrap();
    publish.send(event("Traceback: KeyError 'id'", 500)).unwrap();
    wait_until(|| transport.sent().len() > replies).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let notifications: Vec<ChannelMessage> = transport.sent().split_off(replies);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].chat_id, ChatId(42));
    assert!(notifications[0].content.contains("KeyError"));
    assert!(notifications[0].content.contains("/api/orders"));

    let stats = handle.stop().await;
    assert_eq!(stats.received, 2);
    assert_eq!(stats.deliveries, 1);

    // Stopping wrote a final snapshot.
    let snapshot = SnapshotFile::new(dir.path().join("sessions.json"))
        .read()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.sessions.len(), 2);
}

#[tokio::test]
async fn test_restart_restores_listening_session() {
    let dir = TempDir::new().unwrap();

    {
        let transport = Arc::new(Recorder::default());
        let (_publish, broker) = queue_broker();
        let relay = RelayCoordinator::new(relay_config(&dir), transport, broker);
        for text in [PASSWORD, "/listen server-error"] {
            relay.handle_message(inbound(42, text)).await;
        }
        assert_eq!(relay.persist().await.unwrap(), 1);
    }

    let transport = Arc::new(Recorder::default());
    let (publish, broker) = queue_broker();
    let relay = Arc::new(RelayCoordinator::new(
        relay_config(&dir),
        transport.clone(),
        broker,
    ));
    assert_eq!(relay.restore().await, 1);

    let session = relay.store().get(ChatId(42)).await;
    assert_eq!(session.state(), SessionState::Listening);
    assert_eq!(session.subscriptions(), &BTreeSet::from([Tier::ServerError]));

    let (_inbound_tx, inbound_rx) = mpsc::channel(4);
    let handle = relay.clone().start(inbound_rx);
    publish.send(event("database is locked", 503)).unwrap();
    wait_until(|| !transport.sent().is_empty()).await;
    handle.stop().await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, ChatId(42));
    assert!(sent[0].content.contains("database is locked"));
}

#[tokio::test]
async fn test_periodic_snapshot() {
    let dir = TempDir::new().unwrap();
    let mut config = relay_config(&dir);
    config.autosave = Duration::from_millis(20);
    let path = config.snapshot_path();

    let (_publish, broker) = queue_broker();
    let relay = Arc::new(RelayCoordinator::new(
        config,
        Arc::new(Recorder::default()),
        broker,
    ));
    let (inbound_tx, inbound_rx) = mpsc::channel(4);
    let handle = relay.start(inbound_rx);

    inbound_tx
        .send(ChannelEvent::MessageReceived(inbound(3, PASSWORD)))
        .await
        .unwrap();

    let file = SnapshotFile::new(&path);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Some(snapshot)) = file.read().await {
                if snapshot.sessions.len() == 1 {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    handle.stop().await;
}

#[tokio::test]
async fn test_closed_transport_is_reported() {
    let dir = TempDir::new().unwrap();
    let (_publish, broker) = queue_broker();
    let relay = Arc::new(RelayCoordinator::new(
        relay_config(&dir),
        Arc::new(Recorder::default()),
        broker,
    ));
    let (inbound_tx, inbound_rx) = mpsc::channel(4);
    let handle = relay.start(inbound_rx);

    let mut state = handle.listener_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ListenerState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    drop(inbound_tx);
    tokio::time::timeout(Duration::from_secs(5), handle.wait_inbound_closed())
        .await
        .unwrap();
    handle.stop().await;
}

#[tokio::test]
async fn test_unwritable_data_dir_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    // A regular file where the data directory should be.
    let blocker = dir.path().join("data");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let (_publish, broker) = queue_broker();
    let transport = Arc::new(Recorder::default());
    let relay = RelayCoordinator::new(
        RelayConfig::new(&blocker, PASSWORD),
        transport.clone(),
        broker,
    );
    assert_eq!(relay.restore().await, 0);
    relay.handle_message(inbound(1, PASSWORD)).await;
    assert!(relay.persist().await.is_err());
    assert_eq!(relay.store().len().await, 1);
}

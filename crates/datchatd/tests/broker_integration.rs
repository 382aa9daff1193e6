//! Integration tests for the TCP broker.
//!
//! These tests run a real `Broker` on an ephemeral localhost port and
//! drive it with framed TCP clients: handshakes, chat relay, logout,
//! abrupt disconnects, and shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{FramedRead, FramedWrite};

use datchat_core::{ChatSink, OnlineStatus, PresenceRecord};
use datchat_protocol::{Envelope, EnvelopeCodec};
use datchatd::{Broker, BrokerConfig, BrokerError, FileLogSink, JoinPolicy, SinkSet};

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for any single expected envelope
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait when asserting that nothing more arrives
const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Interval between registry polls
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

/// Sink that records server events.
#[derive(Default)]
struct EventRecorder {
    events: Mutex<Vec<String>>,
}

impl ChatSink for EventRecorder {
    fn on_server_event(&self, line: &str) {
        self.events.lock().unwrap().push(line.to_string());
    }
}

/// Running broker plus its serve task.
struct TestBroker {
    broker: Broker,
    addr: SocketAddr,
    task: JoinHandle<Result<(), BrokerError>>,
}

impl TestBroker {
    async fn spawn(config: BrokerConfig, sinks: SinkSet) -> Self {
        let config = BrokerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..config
        };
        let broker = Broker::new(config, sinks).expect("valid config");
        let listener = broker.bind().await.expect("bind");
        let addr = listener.local_addr().unwrap();

        let server = broker.clone();
        let task = tokio::spawn(async move { server.serve(listener).await });

        Self { broker, addr, task }
    }

    /// A broker with no join/leave room lines, so streams hold only presence.
    async fn quiet() -> Self {
        Self::spawn(
            BrokerConfig {
                announce_joins: false,
                ..BrokerConfig::default()
            },
            SinkSet::new(),
        )
        .await
    }

    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect");
        TestClient::new(stream)
    }

    /// Connects and completes the handshake, waiting for the own ONLINE echo.
    async fn join(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.send(Envelope::text(name)).await;
        client
            .recv_until(|env| presence_of(env, name, OnlineStatus::Online))
            .await
            .expect("own ONLINE presence");
        client
    }

    async fn wait_for_len(&self, n: usize) {
        let start = tokio::time::Instant::now();
        while start.elapsed() < RECV_TIMEOUT {
            if self.broker.registry().len().await == n {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!(
            "registry has {} entries, expected {n}",
            self.broker.registry().len().await
        );
    }

    async fn shutdown(self) {
        self.broker.stop();
        timeout(Duration::from_secs(10), self.task)
            .await
            .expect("broker stopped in time")
            .expect("serve task")
            .expect("serve result");
    }
}

/// Framed TCP chat client.
struct TestClient {
    reader: FramedRead<tokio::net::tcp::OwnedReadHalf, EnvelopeCodec>,
    writer: FramedWrite<tokio::net::tcp::OwnedWriteHalf, EnvelopeCodec>,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: FramedRead::new(reader, EnvelopeCodec::new()),
            writer: FramedWrite::new(writer, EnvelopeCodec::new()),
        }
    }

    async fn send(&mut self, envelope: Envelope) {
        self.writer.send(envelope).await.expect("send envelope");
    }

    /// Next envelope, or `None` on EOF, error, or timeout.
    async fn recv_within(&mut self, wait: Duration) -> Option<Envelope> {
        timeout(wait, self.reader.next())
            .await
            .ok()
            .flatten()
            .and_then(Result::ok)
    }

    async fn recv(&mut self) -> Option<Envelope> {
        self.recv_within(RECV_TIMEOUT).await
    }

    /// Skips envelopes until one matches.
    async fn recv_until(&mut self, pred: impl Fn(&Envelope) -> bool) -> Option<Envelope> {
        while let Some(env) = self.recv().await {
            if pred(&env) {
                return Some(env);
            }
        }
        None
    }

    /// Collects everything that arrives within the quiet period.
    async fn drain(&mut self) -> Vec<Envelope> {
        let mut seen = Vec::new();
        while let Some(env) = self.recv_within(QUIET_PERIOD).await {
            seen.push(env);
        }
        seen
    }

    /// True once the broker has closed the transport.
    async fn is_closed_by_broker(&mut self) -> bool {
        loop {
            match timeout(RECV_TIMEOUT, self.reader.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }
}

fn presence_of(env: &Envelope, name: &str, status: OnlineStatus) -> bool {
    env.as_presence()
        .is_some_and(|rec: &PresenceRecord| rec.username.as_str() == name && rec.status == status)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_single_client_registers() {
    let broker = TestBroker::quiet().await;

    let _alice = broker.join("alice").await;
    broker.wait_for_len(1).await;

    let snapshot = broker.broker.registry().snapshot().await;
    assert_eq!(snapshot[0].username().as_str(), "alice");
    assert_eq!(snapshot[0].remote_host(), "127.0.0.1");

    broker.shutdown().await;
}

#[tokio::test]
async fn test_chat_reaches_other_clients_with_identity_prefix() {
    let broker = TestBroker::quiet().await;
    let mut alice = broker.join("alice").await;
    let mut bob = broker.join("bob").await;
    alice
        .recv_until(|env| presence_of(env, "bob", OnlineStatus::Online))
        .await
        .unwrap();

    alice.send(Envelope::text("hi")).await;

    let line = bob.recv_until(|env| env.as_text().is_some()).await.unwrap();
    let text = line.as_text().unwrap();
    assert!(text.contains("alice:"), "missing sender prefix: {text:?}");
    assert!(text.ends_with("  hi"));
    // HH:MM:SS prefix
    assert_eq!(text.as_bytes()[2], b':');
    assert_eq!(text.as_bytes()[5], b':');

    broker.shutdown().await;
}

#[tokio::test]
async fn test_newcomer_receives_roster() {
    let broker = TestBroker::quiet().await;
    let _alice = broker.join("alice").await;
    let _bob = broker.join("bob").await;

    let mut carol = broker.connect().await;
    carol.send(Envelope::text("carol")).await;

    let mut seen = Vec::new();
    while let Some(env) = carol.recv().await {
        let done = presence_of(&env, "carol", OnlineStatus::Online);
        seen.push(env.as_presence().unwrap().username.to_string());
        if done {
            break;
        }
    }
    seen.sort();
    assert_eq!(seen, vec!["alice", "bob", "carol"]);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_announce_only_sends_only_own_presence() {
    let broker = TestBroker::spawn(
        BrokerConfig {
            announce_joins: false,
            join_policy: JoinPolicy::AnnounceOnly,
            ..BrokerConfig::default()
        },
        SinkSet::new(),
    )
    .await;
    let _alice = broker.join("alice").await;

    let mut bob = broker.connect().await;
    bob.send(Envelope::text("bob")).await;
    let first = bob.recv().await.unwrap();
    assert!(presence_of(&first, "bob", OnlineStatus::Online));

    broker.shutdown().await;
}

#[tokio::test]
async fn test_logout_broadcasts_offline_once() {
    let broker = TestBroker::quiet().await;
    let mut alice = broker.join("alice").await;
    let mut bob = broker.join("bob").await;
    broker.wait_for_len(2).await;

    alice.send(Envelope::Logout).await;
    // A second LOGOUT on a closing transport must not produce anything
    let _ = alice.writer.send(Envelope::Logout).await;

    bob.recv_until(|env| presence_of(env, "alice", OnlineStatus::Offline))
        .await
        .expect("alice OFFLINE");
    broker.wait_for_len(1).await;

    let rest = bob.drain().await;
    assert!(
        !rest
            .iter()
            .any(|env| presence_of(env, "alice", OnlineStatus::Offline)),
        "duplicate OFFLINE: {rest:?}"
    );
    assert!(alice.is_closed_by_broker().await);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_abrupt_disconnect_reaches_every_survivor_once() {
    let broker = TestBroker::quiet().await;
    let alice = broker.join("alice").await;
    let mut survivors = Vec::new();
    for name in ["bob", "carol", "dave"] {
        survivors.push(broker.join(name).await);
    }
    broker.wait_for_len(4).await;
    let alice_id = broker
        .broker
        .registry()
        .snapshot()
        .await
        .into_iter()
        .find(|h| h.username().as_str() == "alice")
        .unwrap()
        .id();

    // Kill the transport without a LOGOUT
    drop(alice);

    for survivor in &mut survivors {
        survivor
            .recv_until(|env| presence_of(env, "alice", OnlineStatus::Offline))
            .await
            .expect("alice OFFLINE");
        let rest = survivor.drain().await;
        assert!(!rest
            .iter()
            .any(|env| presence_of(env, "alice", OnlineStatus::Offline)));
    }

    let snapshot = broker.broker.registry().snapshot().await;
    assert_eq!(snapshot.len(), 3);
    assert!(snapshot.iter().all(|h| h.id() != alice_id));

    broker.shutdown().await;
}

#[tokio::test]
async fn test_garbage_handshake_never_registers() {
    let broker = TestBroker::quiet().await;
    let mut watcher = broker.join("watcher").await;

    let mut raw = TcpStream::connect(broker.addr).await.unwrap();
    raw.write_all(b"\xff\xfe garbage \x00\n").await.unwrap();

    let mut reader = FramedRead::new(raw, EnvelopeCodec::new());
    let closed = timeout(RECV_TIMEOUT, reader.next()).await.unwrap();
    assert!(matches!(closed, None | Some(Err(_))));

    assert_eq!(broker.broker.registry().len().await, 1);
    assert!(watcher.drain().await.is_empty());

    broker.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_handshakes_all_register() {
    const N: usize = 24;
    let broker = TestBroker::quiet().await;

    let joins = (0..N).map(|i| {
        let addr = broker.addr;
        tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut client = TestClient::new(stream);
            client.send(Envelope::text(format!("user{i}"))).await;
            client
        })
    });
    let mut clients = Vec::new();
    for join in joins.collect::<Vec<_>>() {
        clients.push(join.await.unwrap());
    }

    broker.wait_for_len(N).await;
    let mut ids: Vec<_> = broker
        .broker
        .registry()
        .snapshot()
        .await
        .iter()
        .map(|h| h.id())
        .collect();
    ids.dedup();
    assert_eq!(ids.len(), N);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_connection_cap_abandons_extra_clients() {
    let broker = TestBroker::spawn(
        BrokerConfig {
            max_connections: 2,
            announce_joins: false,
            ..BrokerConfig::default()
        },
        SinkSet::new(),
    )
    .await;
    let _a = broker.join("a").await;
    let _b = broker.join("b").await;

    let mut c = broker.connect().await;
    c.send(Envelope::text("c")).await;
    assert!(c.is_closed_by_broker().await);
    assert_eq!(broker.broker.registry().len().await, 2);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_stop_closes_every_client() {
    let broker = TestBroker::quiet().await;
    let mut clients = Vec::new();
    for name in ["alice", "bob", "carol"] {
        clients.push(broker.join(name).await);
    }
    broker.wait_for_len(3).await;

    let registry = broker.broker.registry().clone();
    broker.shutdown().await;

    for client in &mut clients {
        assert!(client.is_closed_by_broker().await);
    }
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_announcements_and_file_logs() {
    let dir = tempfile::tempdir().unwrap();
    let file_sink = Arc::new(FileLogSink::create(dir.path()).unwrap());
    let recorder = Arc::new(EventRecorder::default());
    let sinks = SinkSet::new()
        .with(file_sink.clone())
        .with(recorder.clone());

    let broker = TestBroker::spawn(BrokerConfig::default(), sinks).await;
    let mut alice = broker.join("alice").await;
    let joined = alice
        .recv_until(|env| env.as_text().is_some())
        .await
        .unwrap();
    let joined = joined.as_text().unwrap();
    assert!(joined.contains("SERVER:"));
    assert!(joined.ends_with("alice has connected."));

    alice.send(Envelope::text("hello room")).await;
    alice
        .recv_until(|env| env.as_text().is_some_and(|t| t.ends_with("hello room")))
        .await
        .unwrap();

    alice.send(Envelope::Logout).await;
    broker.wait_for_len(0).await;
    broker.shutdown().await;

    let chat = std::fs::read_to_string(file_sink.chat_path()).unwrap();
    let lines: Vec<&str> = chat.lines().collect();
    assert_eq!(lines.len(), 3, "chat log: {chat:?}");
    assert!(lines[0].ends_with("alice has connected."));
    assert!(lines[1].contains("alice:") && lines[1].ends_with("hello room"));
    assert!(lines[2].ends_with("alice disconnected."));

    let events = recorder.events.lock().unwrap().clone();
    assert!(events.iter().any(|e| e.starts_with("Server waiting for clients")));
    assert!(events.iter().any(|e| e == "alice disconnected with a LOGOUT message."));
    assert!(events.iter().any(|e| e == "Stop requested."));
}

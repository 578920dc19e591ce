use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use chrono::Utc;
use courier_db::Database;
use courier_db::models::format_timestamp;
use courier_gateway::auth::JwtAuthenticator;
use courier_gateway::store::{ChatStore, SqliteStore};
use courier_gateway::{GatewayConfig, GatewayState, router};
use courier_types::models::{Message, MessageContent};
use courier_types::{ChatError, ChatResult, ConversationId, UserId};

const SECRET: &str = "delivery-test-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    db: Arc<Database>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl Harness {
    async fn start() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(SqliteStore::new(db.clone()));
        Self::with_store(db, store).await
    }

    async fn with_store(db: Arc<Database>, store: Arc<dyn ChatStore>) -> Self {
        let shutdown = CancellationToken::new();
        let sessions = TaskTracker::new();
        let state = GatewayState {
            store,
            auth: Arc::new(JwtAuthenticator::new(SECRET)),
            config: GatewayConfig {
                poll_interval: Duration::from_millis(50),
                heartbeat_interval: Duration::from_secs(30),
            },
            shutdown: shutdown.clone(),
            sessions: sessions.clone(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Self {
            addr,
            db,
            shutdown,
            sessions,
        }
    }

    fn user(&self, name: &str) -> UserId {
        self.db.create_user(name, "", "", false).unwrap()
    }

    /// Connect as `user` (Bearer header) with the given raw query string.
    async fn connect(&self, user: Option<UserId>, query: &str) -> Client {
        let mut request = format!("ws://{}/gateway?{}", self.addr, query)
            .into_client_request()
            .unwrap();
        if let Some(user) = user {
            let header = format!("Bearer {}", token(user));
            request
                .headers_mut()
                .insert(AUTHORIZATION, header.parse().unwrap());
        }
        let (ws, _) = connect_async(request).await.unwrap();
        ws
    }

    /// Connect and consume the Ready event.
    async fn open_session(&self, user: UserId, peer: UserId) -> Client {
        let mut ws = self.connect(Some(user), &format!("peer_id={peer}")).await;
        let ready = next_event(&mut ws).await;
        assert_eq!(ready["type"], "Ready", "{ready}");
        ws
    }
}

fn token(user: UserId) -> String {
    JwtAuthenticator::new(SECRET)
        .issue(user, chrono::Duration::hours(1))
        .unwrap()
}

async fn try_next_event(ws: &mut Client, wait: Duration) -> Option<Value> {
    loop {
        let frame = match timeout(wait, ws.next()).await {
            Ok(Some(Ok(frame))) => frame,
            _ => return None,
        };
        match frame {
            WsMessage::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            _ => return None,
        }
    }
}

async fn next_event(ws: &mut Client) -> Value {
    try_next_event(ws, Duration::from_secs(5))
        .await
        .expect("expected an event")
}

async fn expect_closed(ws: &mut Client) {
    loop {
        match timeout(Duration::from_secs(5), ws.next()).await {
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(WsMessage::Close(_)))) => return,
            Ok(Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_)))) => continue,
            Ok(Some(Ok(other))) => panic!("expected close, got {other:?}"),
            Err(_) => panic!("connection was not closed"),
        }
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(WsMessage::Text(value.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn message_reaches_peer_exactly_once() {
    let h = Harness::start().await;
    let alice = h.user("alice");
    let bob = h.user("bob");

    let mut a = h.open_session(alice, bob).await;
    send_json(&mut a, json!({"type": "SendMessage", "data": {"content": "hello"}})).await;
    let ack = next_event(&mut a).await;
    assert_eq!(ack["type"], "MessageAck", "{ack}");
    let id = ack["data"]["id"].as_i64().unwrap();

    let history = h.db.list_between(alice, bob, 1, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_read);

    let mut b = h.open_session(bob, alice).await;
    let pushed = next_event(&mut b).await;
    assert_eq!(pushed["type"], "Messages", "{pushed}");
    let messages = pushed["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], id);
    assert_eq!(messages[0]["content"], "hello");
    assert_eq!(messages[0]["sender_id"], alice);

    // Later polls find nothing new.
    assert!(try_next_event(&mut b, Duration::from_millis(300)).await.is_none());
    assert_eq!(h.db.unread_count(bob, alice).unwrap(), 0);
    assert!(h.db.list_between(alice, bob, 1, 10).unwrap()[0].is_read);

    // The sender's own session never sees its outbound message.
    assert!(try_next_event(&mut a, Duration::from_millis(100)).await.is_none());
}

#[tokio::test]
async fn ready_reports_the_conversation() {
    let h = Harness::start().await;
    let alice = h.user("alice");
    let bob = h.user("bob");

    let mut ws = h.connect(Some(alice), &format!("peer_id={bob}")).await;
    let ready = next_event(&mut ws).await;
    assert_eq!(ready["type"], "Ready");
    assert_eq!(ready["data"]["user_id"], alice);
    assert_eq!(ready["data"]["peer_id"], bob);

    let conv = h.db.find_conversation(bob, alice).unwrap().unwrap();
    assert_eq!(ready["data"]["conversation_id"], conv);
}

#[tokio::test]
async fn query_token_is_accepted() {
    let h = Harness::start().await;
    let alice = h.user("alice");
    let bob = h.user("bob");

    let mut ws = h
        .connect(None, &format!("peer_id={bob}&token={}", token(alice)))
        .await;
    assert_eq!(next_event(&mut ws).await["type"], "Ready");
}

#[tokio::test]
async fn bad_credential_is_rejected() {
    let h = Harness::start().await;
    let bob = h.user("bob");

    for query in [format!("peer_id={bob}"), format!("peer_id={bob}&token=forged")] {
        let mut ws = h.connect(None, &query).await;
        let err = next_event(&mut ws).await;
        assert_eq!(err["type"], "Error");
        assert_eq!(err["data"]["code"], 403);
        expect_closed(&mut ws).await;
    }
}

#[tokio::test]
async fn peer_handshake_errors() {
    let h = Harness::start().await;
    let alice = h.user("alice");

    let cases = [
        (String::new(), 400),
        ("peer_id=bob".to_string(), 400),
        (format!("peer_id={alice}"), 400),
        ("peer_id=9999".to_string(), 404),
    ];

    for (query, code) in cases {
        let mut ws = h.connect(Some(alice), &query).await;
        let err = next_event(&mut ws).await;
        assert_eq!(err["type"], "Error", "{query}");
        assert_eq!(err["data"]["code"], code, "{query}");
        expect_closed(&mut ws).await;
    }
}

#[tokio::test]
async fn malformed_frames_keep_the_session_open() {
    let h = Harness::start().await;
    let alice = h.user("alice");
    let bob = h.user("bob");
    let mut ws = h.open_session(alice, bob).await;

    ws.send(WsMessage::Text("not json".into())).await.unwrap();
    let err = next_event(&mut ws).await;
    assert_eq!(err["type"], "Error");
    assert_eq!(err["data"]["code"], 400);

    send_json(&mut ws, json!({"type": "Teleport", "data": {}})).await;
    assert_eq!(next_event(&mut ws).await["data"]["code"], 400);

    send_json(&mut ws, json!({"type": "SendMessage", "data": {"content": "still here"}})).await;
    assert_eq!(next_event(&mut ws).await["type"], "MessageAck");
}

#[tokio::test]
async fn invalid_content_is_not_stored() {
    let h = Harness::start().await;
    let alice = h.user("alice");
    let bob = h.user("bob");
    let mut ws = h.open_session(alice, bob).await;

    send_json(&mut ws, json!({"type": "SendMessage", "data": {}})).await;
    let failed = next_event(&mut ws).await;
    assert_eq!(failed["type"], "SendFailed");
    assert_eq!(failed["data"]["code"], 400);
    assert_eq!(failed["data"]["retryable"], false);

    let too_long = "x".repeat(251);
    send_json(&mut ws, json!({"type": "SendMessage", "data": {"content": too_long}})).await;
    assert_eq!(next_event(&mut ws).await["type"], "SendFailed");

    assert!(h.db.list_between(alice, bob, 1, 10).unwrap().is_empty());
}

/// Counts unread pulls and fails the first `failures` of them.
struct CountingStore {
    inner: SqliteStore,
    pulls: AtomicUsize,
    failures: usize,
}

#[async_trait]
impl ChatStore for CountingStore {
    async fn user_exists(&self, user: UserId) -> ChatResult<bool> {
        self.inner.user_exists(user).await
    }

    async fn resolve(&self, a: UserId, b: UserId) -> ChatResult<ConversationId> {
        self.inner.resolve(a, b).await
    }

    async fn append(
        &self,
        sender: UserId,
        receiver: UserId,
        body: MessageContent,
    ) -> ChatResult<Message> {
        self.inner.append(sender, receiver, body).await
    }

    async fn pull_unread(&self, receiver: UserId, sender: UserId) -> ChatResult<Vec<Message>> {
        let n = self.pulls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(ChatError::Transient("storage busy".into()));
        }
        self.inner.pull_unread(receiver, sender).await
    }
}

async fn counting_harness(failures: usize) -> (Harness, Arc<CountingStore>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = Arc::new(CountingStore {
        inner: SqliteStore::new(db.clone()),
        pulls: AtomicUsize::new(0),
        failures,
    });
    let h = Harness::with_store(db, store.clone()).await;
    (h, store)
}

#[tokio::test]
async fn polling_stops_after_client_closes() {
    let (h, store) = counting_harness(0).await;
    let alice = h.user("alice");
    let bob = h.user("bob");

    let mut ws = h.open_session(alice, bob).await;
    sleep(Duration::from_millis(250)).await;
    assert!(store.pulls.load(Ordering::SeqCst) > 0);

    ws.close(None).await.unwrap();
    drop(ws);
    sleep(Duration::from_millis(150)).await;

    let after_close = store.pulls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(store.pulls.load(Ordering::SeqCst), after_close);
}

#[tokio::test]
async fn transient_poll_failures_skip_a_cycle() {
    let (h, _store) = counting_harness(3).await;
    let alice = h.user("alice");
    let bob = h.user("bob");
    h.db.append_message(bob, alice, &MessageContent::text("queued"), chrono::Utc::now())
        .unwrap();

    let mut ws = h.open_session(alice, bob).await;
    let pushed = next_event(&mut ws).await;
    assert_eq!(pushed["type"], "Messages");
    assert_eq!(pushed["data"]["messages"][0]["content"], "queued");
}

#[tokio::test]
async fn server_shutdown_closes_sessions() {
    let (h, store) = counting_harness(0).await;
    let alice = h.user("alice");
    let bob = h.user("bob");

    let mut ws = h.open_session(alice, bob).await;
    h.shutdown.cancel();
    h.sessions.close();
    timeout(Duration::from_secs(5), h.sessions.wait())
        .await
        .expect("session tasks did not finish");
    assert!(h.sessions.is_empty());
    expect_closed(&mut ws).await;

    sleep(Duration::from_millis(100)).await;
    let after = store.pulls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(store.pulls.load(Ordering::SeqCst), after);
}

#[tokio::test]
async fn storage_timeouts_do_not_lose_messages() {
    let db = Arc::new(
        Database::open_in_memory()
            .unwrap()
            .with_call_timeout(Duration::from_millis(30)),
    );
    let h = Harness::with_store(db.clone(), Arc::new(SqliteStore::new(db.clone()))).await;
    let alice = h.user("alice");
    let bob = h.user("bob");
    let mut ws = h.open_session(alice, bob).await;

    // Queue a message, then keep the connection busy across several polls.
    let busy = db.clone();
    let holder = std::thread::spawn(move || {
        busy.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, is_read, created_at)
                 VALUES (?1, ?2, 'queued', 0, ?3)",
                (bob, alice, format_timestamp(Utc::now())),
            )
            .map_err(|e| ChatError::Fatal(e.to_string()))?;
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
    });

    let pushed = next_event(&mut ws).await;
    assert_eq!(pushed["type"], "Messages", "{pushed}");
    assert_eq!(pushed["data"]["messages"][0]["content"], "queued");
    holder.join().unwrap().unwrap();

    assert!(try_next_event(&mut ws, Duration::from_millis(200)).await.is_none());
    assert_eq!(db.unread_count(alice, bob).unwrap(), 0);
}

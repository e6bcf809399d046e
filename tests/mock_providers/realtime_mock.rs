//! Mock Realtime API WebSocket Server
//!
//! Speaks just enough of the Realtime wire protocol to exercise the bridge:
//! announces `session.created` on connect, records every `session.update`
//! and `input_audio_buffer.append` it receives, and lets tests inject
//! arbitrary server events (audio deltas, errors) toward the bridge.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

/// How the mock behaves toward a freshly connected client.
#[derive(Clone, Debug)]
pub struct MockBehavior {
    /// Send `session.created` as soon as the handshake completes.
    pub announce_session: bool,
    /// Send `session.created` a second time (duplicate-event scenario).
    pub announce_twice: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            announce_session: true,
            announce_twice: false,
        }
    }
}

impl MockBehavior {
    /// Never announce the session; the bridge must fall back to its timer.
    pub fn silent() -> Self {
        Self {
            announce_session: false,
            announce_twice: false,
        }
    }

    /// Announce the session twice in a row.
    pub fn duplicate_announce() -> Self {
        Self {
            announce_session: true,
            announce_twice: true,
        }
    }
}

/// Shared state recording everything the mock observed.
#[derive(Default)]
pub struct MockRealtimeState {
    pub session_updates: Mutex<Vec<Value>>,
    pub appended_audio: Mutex<Vec<String>>,
    pub last_authorization: Mutex<Option<String>>,
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
}

pub struct MockRealtimeServer {
    addr: SocketAddr,
    state: Arc<MockRealtimeState>,
    event_tx: broadcast::Sender<String>,
}

impl MockRealtimeServer {
    /// Bind to an ephemeral port and start accepting connections.
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock realtime server");
        let addr = listener.local_addr().expect("mock local addr");
        let state = Arc::new(MockRealtimeState::default());
        let (event_tx, _) = broadcast::channel::<String>(64);

        let accept_state = state.clone();
        let accept_tx = event_tx.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = accept_state.clone();
                let events = accept_tx.subscribe();
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state, events, behavior).await {
                        eprintln!("mock realtime connection error: {}", e);
                    }
                });
            }
        });

        Self {
            addr,
            state,
            event_tx,
        }
    }

    /// Endpoint override to hand the bridge under test.
    pub fn endpoint(&self) -> String {
        format!("ws://{}/realtime", self.addr)
    }

    /// Inject a raw server event toward every connected client.
    pub fn send_event(&self, event: Value) {
        let _ = self.event_tx.send(event.to_string());
    }

    /// Inject a `response.audio.delta` carrying the given base64 payload.
    pub fn send_audio_delta(&self, delta: &str) {
        self.send_event(json!({
            "type": "response.audio.delta",
            "delta": delta,
        }));
    }

    pub async fn session_update_count(&self) -> usize {
        self.state.session_updates.lock().await.len()
    }

    pub async fn session_updates(&self) -> Vec<Value> {
        self.state.session_updates.lock().await.clone()
    }

    pub async fn appended_audio(&self) -> Vec<String> {
        self.state.appended_audio.lock().await.clone()
    }

    pub async fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().await.clone()
    }

    /// Wait until at least `n` connections have been opened.
    pub async fn wait_for_connections(&self, n: u64, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.state.connections_opened.load(Ordering::SeqCst) >= n
        })
        .await
    }

    /// Wait until at least `n` connections have been closed.
    pub async fn wait_for_disconnects(&self, n: u64, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.state.connections_closed.load(Ordering::SeqCst) >= n
        })
        .await
    }

    /// Wait until the mock has received at least `n` audio appends.
    pub async fn wait_for_appends(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.state.appended_audio.lock().await.len() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockRealtimeState>,
    mut events: broadcast::Receiver<String>,
    behavior: MockBehavior,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let auth_state = state.clone();
    let callback = move |req: &Request, resp: Response| {
        let auth = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        if let Ok(mut slot) = auth_state.last_authorization.try_lock() {
            *slot = auth;
        }
        Ok(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let (mut write, mut read) = ws_stream.split();

    state.connections_opened.fetch_add(1, Ordering::SeqCst);
    let conn_id = state.connections_opened.load(Ordering::SeqCst);

    if behavior.announce_session {
        let created = json!({
            "type": "session.created",
            "session": {
                "id": format!("sess-mock-{}", conn_id),
                "model": "gpt-4o-realtime-preview-2024-10-01",
            }
        });
        write.send(Message::Text(created.to_string().into())).await?;
        if behavior.announce_twice {
            write.send(Message::Text(created.to_string().into())).await?;
        }
    }

    loop {
        tokio::select! {
            injected = events.recv() => {
                match injected {
                    Ok(text) => write.send(Message::Text(text.into())).await?,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(value) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        match value.get("type").and_then(|t| t.as_str()) {
                            Some("session.update") => {
                                state.session_updates.lock().await.push(value);
                            }
                            Some("input_audio_buffer.append") => {
                                if let Some(audio) =
                                    value.get("audio").and_then(|a| a.as_str())
                                {
                                    state
                                        .appended_audio
                                        .lock()
                                        .await
                                        .push(audio.to_string());
                                }
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.connections_closed.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

//! OpenAI Realtime API client.
//!
//! WebSocket client for OpenAI's Realtime API, scoped to one telephone call.
//! The connection is fail-fast: once the socket drops, for any reason, the
//! client reports closure and stays closed. The owning call session decides
//! what happens next (it tears the call down).
//!
//! # Configuration handshake
//!
//! The session configuration is sent exactly once per connection, triggered
//! by whichever comes first: the `session.created` event from the API, or a
//! fallback timer (default 1000ms) for servers that never acknowledge. A
//! timer firing after the connection closed is a no-op.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::Request;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tracing::{debug, error, info, warn};
use url::Url;

use super::config::{
    OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
use super::messages::{ClientEvent, ServerEvent, SessionConfig};
use crate::core::realtime::base::{
    AudioDeltaCallback, BaseRealtime, ConnectionClosedCallback, ConnectionState, RealtimeConfig,
    RealtimeError, RealtimeErrorCallback, RealtimeResult,
};

/// Outgoing event channel capacity.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long disconnect waits for the connection task to drain its close
/// frame before aborting it.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

// =============================================================================
// Session Configuration Sender
// =============================================================================

/// Sends the session configuration at most once per connection.
///
/// The `session.created` event and the fallback timer both race toward this;
/// whichever fires first wins and the loser becomes a no-op. A trigger that
/// arrives after the connection closed is also a no-op.
struct SessionConfigSender {
    outgoing: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    session: SessionConfig,
    sent: AtomicBool,
    connected: Arc<AtomicBool>,
}

impl SessionConfigSender {
    fn new(
        outgoing: mpsc::Sender<ClientEvent>,
        session: SessionConfig,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            outgoing: Mutex::new(Some(outgoing)),
            session,
            sent: AtomicBool::new(false),
            connected,
        }
    }

    async fn send(&self) {
        if self
            .sent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        // Once the race is decided this sender is never used again. Taking
        // the channel handle out lets the channel close as soon as the
        // client drops its own handle, so the connection task can drain.
        let outgoing = self.outgoing.lock().await.take();
        if !self.connected.load(Ordering::SeqCst) {
            debug!("Connection closed before configuration send, skipping");
            return;
        }
        let Some(outgoing) = outgoing else {
            return;
        };
        let event = ClientEvent::SessionUpdate {
            session: self.session.clone(),
        };
        match outgoing.send(event).await {
            Ok(()) => info!("Session configuration sent"),
            Err(_) => debug!("Connection task gone before configuration send"),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// OpenAI Realtime API client.
///
/// Implements [`BaseRealtime`] over a single WebSocket connection. Audio is
/// exchanged as base64 payloads; the session configuration is derived from
/// the [`RealtimeConfig`] given at construction.
pub struct OpenAIRealtime {
    config: RealtimeConfig,
    model: OpenAIRealtimeModel,
    voice: OpenAIRealtimeVoice,
    input_format: OpenAIRealtimeAudioFormat,
    output_format: OpenAIRealtimeAudioFormat,

    connected: Arc<AtomicBool>,
    connection_state: Arc<RwLock<ConnectionState>>,
    intentional_disconnect: Arc<AtomicBool>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
    connection_handle: Option<JoinHandle<()>>,

    audio_delta_callback: Arc<Mutex<Option<AudioDeltaCallback>>>,
    error_callback: Arc<Mutex<Option<RealtimeErrorCallback>>>,
    closed_callback: Arc<Mutex<Option<ConnectionClosedCallback>>>,
}

impl OpenAIRealtime {
    /// Get the model this client connects with.
    pub fn model(&self) -> OpenAIRealtimeModel {
        self.model
    }

    /// Get the voice this client configures.
    pub fn voice(&self) -> OpenAIRealtimeVoice {
        self.voice
    }

    /// Build the connection URL, honoring the endpoint override.
    fn build_url(&self) -> String {
        let base = self
            .config
            .endpoint
            .as_deref()
            .unwrap_or(OPENAI_REALTIME_URL);
        format!("{}?model={}", base, self.model.as_str())
    }

    /// Build the session configuration sent in the one-time `session.update`.
    fn build_session_config(&self) -> SessionConfig {
        let turn_detection = self.config.turn_detection.clone().unwrap_or_default();
        SessionConfig {
            turn_detection: Some(turn_detection.into()),
            input_audio_format: Some(self.input_format.as_str().to_string()),
            output_audio_format: Some(self.output_format.as_str().to_string()),
            voice: Some(self.voice.as_str().to_string()),
            instructions: self.config.instructions.clone(),
            modalities: Some(
                self.config
                    .modalities
                    .clone()
                    .unwrap_or_else(|| vec!["text".to_string(), "audio".to_string()]),
            ),
            temperature: self.config.temperature,
        }
    }

    /// Queue an event for the connection task.
    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        let sender = self.ws_sender.lock().await;
        match sender.as_ref() {
            Some(tx) => tx
                .send(event)
                .await
                .map_err(|_| RealtimeError::NotConnected),
            None => Err(RealtimeError::NotConnected),
        }
    }

    fn set_state(state: &Arc<RwLock<ConnectionState>>, value: ConnectionState) {
        let mut guard = match state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = value;
    }

    /// Dispatch one server event to the session callbacks.
    async fn handle_server_event(
        event: ServerEvent,
        raw: &str,
        config_sender: &Arc<SessionConfigSender>,
        audio_delta_callback: &Arc<Mutex<Option<AudioDeltaCallback>>>,
        error_callback: &Arc<Mutex<Option<RealtimeErrorCallback>>>,
    ) {
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(
                    "Session created{}",
                    session
                        .id
                        .as_deref()
                        .map(|id| format!(" (id={id})"))
                        .unwrap_or_default()
                );
                // Sending from the read path would contend with this loop,
                // so the configuration goes out from its own task.
                let config_sender = config_sender.clone();
                tokio::spawn(async move {
                    config_sender.send().await;
                });
            }
            ServerEvent::SessionUpdated { session } => {
                info!(
                    "Session configuration acknowledged{}",
                    session
                        .model
                        .as_deref()
                        .map(|model| format!(" (model={model})"))
                        .unwrap_or_default()
                );
            }
            ServerEvent::AudioDelta { delta } => {
                if let Some(callback) = audio_delta_callback.lock().await.as_ref() {
                    callback(delta).await;
                }
            }
            ServerEvent::Error { error } => {
                warn!(
                    "Server reported error: {} ({})",
                    error.message, error.error_type
                );
                if let Some(callback) = error_callback.lock().await.as_ref() {
                    callback(RealtimeError::ProviderError(error.message.clone())).await;
                }
            }
            ServerEvent::Unrecognized => {
                let kind = serde_json::from_str::<serde_json::Value>(raw)
                    .ok()
                    .and_then(|value| {
                        value
                            .get("type")
                            .and_then(|t| t.as_str())
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| "unknown".to_string());
                debug!("Ignoring server event: {}", kind);
            }
        }
    }
}

impl Default for OpenAIRealtime {
    fn default() -> Self {
        // Construction is infallible; connect() rejects the empty key.
        match Self::new(RealtimeConfig::default()) {
            Ok(client) => client,
            Err(_) => unreachable!("default realtime config is always constructible"),
        }
    }
}

#[async_trait]
impl BaseRealtime for OpenAIRealtime {
    fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        let model = OpenAIRealtimeModel::from_str_or_default(&config.model);
        let voice = config
            .voice
            .as_deref()
            .map(OpenAIRealtimeVoice::from_str_or_default)
            .unwrap_or_default();
        let input_format = config
            .input_audio_format
            .as_deref()
            .map(OpenAIRealtimeAudioFormat::from_str_or_default)
            .unwrap_or_default();
        let output_format = config
            .output_audio_format
            .as_deref()
            .map(OpenAIRealtimeAudioFormat::from_str_or_default)
            .unwrap_or_default();

        Ok(Self {
            config,
            model,
            voice,
            input_format,
            output_format,
            connected: Arc::new(AtomicBool::new(false)),
            connection_state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            connection_handle: None,
            audio_delta_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
            closed_callback: Arc::new(Mutex::new(None)),
        })
    }

    async fn connect(&mut self) -> RealtimeResult<()> {
        if self.config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is empty".to_string(),
            ));
        }

        Self::set_state(&self.connection_state, ConnectionState::Connecting);

        let url = self.build_url();
        let parsed = Url::parse(&url)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid endpoint: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| {
                RealtimeError::InvalidConfiguration("Endpoint has no host".to_string())
            })?
            .to_string();
        let host_header = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };

        debug!(
            "Connecting to realtime endpoint: model={}, voice={}, audio={} ({} Hz)",
            self.model,
            self.voice,
            self.input_format,
            self.input_format.sample_rate()
        );

        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host_header)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(format!("Invalid request: {e}")))?;

        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            Self::set_state(&self.connection_state, ConnectionState::Failed);
            RealtimeError::ConnectionFailed(e.to_string())
        })?;

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);

        *self.ws_sender.lock().await = Some(tx.clone());
        self.connected.store(true, Ordering::SeqCst);
        self.intentional_disconnect.store(false, Ordering::SeqCst);
        Self::set_state(&self.connection_state, ConnectionState::Connected);

        let config_sender = Arc::new(SessionConfigSender::new(
            tx,
            self.build_session_config(),
            self.connected.clone(),
        ));

        // Fallback path of the configuration handshake. Not cancelled on
        // close; the sender itself no-ops once disconnected.
        {
            let config_sender = config_sender.clone();
            let delay = self.config.config_send_delay_ms;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                debug!("Configuration fallback timer fired after {}ms", delay);
                config_sender.send().await;
            });
        }

        let connected = self.connected.clone();
        let connection_state = self.connection_state.clone();
        let intentional = self.intentional_disconnect.clone();
        let audio_delta_callback = self.audio_delta_callback.clone();
        let error_callback = self.error_callback.clone();
        let closed_callback = self.closed_callback.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        match event {
                            Some(event) => {
                                let json = match serde_json::to_string(&event) {
                                    Ok(json) => json,
                                    Err(e) => {
                                        error!("Failed to serialize client event: {}", e);
                                        continue;
                                    }
                                };
                                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                    error!("Failed to send client event: {}", e);
                                    break;
                                }
                            }
                            None => {
                                let _ = ws_sink.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    message = ws_stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        Self::handle_server_event(
                                            event,
                                            &text,
                                            &config_sender,
                                            &audio_delta_callback,
                                            &error_callback,
                                        )
                                        .await;
                                    }
                                    Err(e) => {
                                        warn!("Failed to parse server event: {} - {}", e, text);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = ws_sink.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("Realtime endpoint closed the connection");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                if let Some(callback) = error_callback.lock().await.as_ref() {
                                    callback(RealtimeError::WebSocketError(e.to_string())).await;
                                }
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            let final_state = if intentional.load(Ordering::SeqCst) {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Failed
            };
            Self::set_state(&connection_state, final_state);

            if let Some(callback) = closed_callback.lock().await.as_ref() {
                callback().await;
            }
        });

        self.connection_handle = Some(handle);
        info!("Connected to realtime endpoint");
        Ok(())
    }

    async fn disconnect(&mut self) -> RealtimeResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        // Dropping the sender lets the connection task send a close frame
        // and drain; the abort covers a task stuck on a dead peer.
        self.ws_sender.lock().await.take();

        if let Some(handle) = self.connection_handle.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                abort.abort();
            }
        }

        Self::set_state(&self.connection_state, ConnectionState::Disconnected);
        debug!("Disconnected from realtime endpoint");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_connection_state(&self) -> ConnectionState {
        match self.connection_state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    async fn append_audio(&mut self, audio: &str) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.send_event(ClientEvent::InputAudioBufferAppend {
            audio: audio.to_string(),
        })
        .await
    }

    fn on_audio_delta(&mut self, callback: AudioDeltaCallback) -> RealtimeResult<()> {
        let slot = self.audio_delta_callback.clone();
        if let Ok(mut guard) = slot.try_lock() {
            *guard = Some(callback);
        } else {
            // Contended only while the connection task holds the lock.
            tokio::spawn(async move {
                *slot.lock().await = Some(callback);
            });
        }
        Ok(())
    }

    fn on_error(&mut self, callback: RealtimeErrorCallback) -> RealtimeResult<()> {
        let slot = self.error_callback.clone();
        if let Ok(mut guard) = slot.try_lock() {
            *guard = Some(callback);
        } else {
            tokio::spawn(async move {
                *slot.lock().await = Some(callback);
            });
        }
        Ok(())
    }

    fn on_closed(&mut self, callback: ConnectionClosedCallback) -> RealtimeResult<()> {
        let slot = self.closed_callback.clone();
        if let Ok(mut guard) = slot.try_lock() {
            *guard = Some(callback);
        } else {
            tokio::spawn(async move {
                *slot.lock().await = Some(callback);
            });
        }
        Ok(())
    }
}

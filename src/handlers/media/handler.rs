//! Media-stream WebSocket handler.
//!
//! The downstream half of the relay: accepts the telephony provider's
//! WebSocket, opens the paired upstream speech connection, and relays audio
//! both ways until either side ends. One handler invocation is one call.
//!
//! # Task layout
//!
//! Three tasks per call: this loop (owns the [`CallSession`] and the
//! receive half of the telephone socket), a sender task (owns the send
//! half), and the upstream connection task inside the provider. Each
//! direction flows through a single channel, so frame order is preserved.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::messages::{TwilioEvent, TwilioOutbound};
use super::session::CallSession;
use crate::config::ServerConfig;
use crate::core::realtime::{
    BaseRealtime, BoxedRealtime, OpenAIRealtime, RealtimeConfig, RealtimeError,
    TurnDetectionConfig,
};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Capacity of the per-call routing channels.
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size. Telephone audio frames are a few hundred
/// bytes; anything larger than this is not a phone call.
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size.
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Events routed from the upstream connection into the call loop.
enum UpstreamRoute {
    /// Synthesized audio delta (base64)
    AudioDelta(String),
    /// Non-fatal provider error
    Error(String),
    /// Upstream connection ended
    Closed,
}

/// Frames routed to the telephone socket sender task.
enum OutboundFrame {
    /// JSON frame for the provider
    Frame(TwilioOutbound),
    /// Close the socket
    Close,
}

/// WebSocket upgrade handler for `/media-stream`.
///
/// The telephony provider connects here once per call, after fetching the
/// voice prompt from `/incoming-call`. Inbound frames are JSON text:
///
/// ```json
/// {"event": "start", "start": {"streamSid": "MZ..."}}
/// {"event": "media", "media": {"payload": "<base64 u-law>"}}
/// ```
///
/// Outbound frames carry synthesized audio addressed with the recorded
/// stream identifier:
///
/// ```json
/// {"event": "media", "streamSid": "MZ...", "media": {"payload": "<base64>"}}
/// ```
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
) -> impl IntoResponse {
    debug!("Media stream upgrade from {}", client_ip);
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_stream(socket, state, client_ip))
}

/// Drive one call from accept to teardown.
async fn handle_media_stream(mut socket: WebSocket, state: Arc<AppState>, client_ip: IpAddr) {
    let mut session = CallSession::new();
    info!(call_id = %session.id(), "Caller connected from {}", client_ip);

    let realtime_config = build_realtime_config(&state.config);
    let mut provider: BoxedRealtime = match OpenAIRealtime::new(realtime_config) {
        Ok(provider) => Box::new(provider),
        Err(e) => {
            error!(call_id = %session.id(), "Failed to create realtime provider: {}", e);
            let _ = socket.send(Message::Close(None)).await;
            state.release_connection(&client_ip);
            return;
        }
    };

    // Upstream events funnel through one channel into this loop.
    let (route_tx, mut route_rx) = mpsc::channel::<UpstreamRoute>(CHANNEL_BUFFER_SIZE);

    let tx = route_tx.clone();
    let _ = provider.on_audio_delta(Arc::new(move |delta| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(UpstreamRoute::AudioDelta(delta)).await;
        })
    }));

    let tx = route_tx.clone();
    let _ = provider.on_error(Arc::new(move |err| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(UpstreamRoute::Error(err.to_string())).await;
        })
    }));

    let tx = route_tx.clone();
    let _ = provider.on_closed(Arc::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(UpstreamRoute::Closed).await;
        })
    }));

    // Fail-fast: a caller we cannot bridge gets closed, not parked.
    if let Err(e) = provider.connect().await {
        error!(call_id = %session.id(), "Upstream connection failed: {}", e);
        session.close();
        let _ = socket.send(Message::Close(None)).await;
        state.release_connection(&client_ip);
        return;
    }
    session.upstream_connected();

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(CHANNEL_BUFFER_SIZE);

    let sender_call_id = session.id();
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            match frame {
                OutboundFrame::Frame(outbound) => {
                    let json = match serde_json::to_string(&outbound) {
                        Ok(json) => json,
                        Err(e) => {
                            error!(
                                call_id = %sender_call_id,
                                "Failed to serialize media frame: {}", e
                            );
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            message = ws_receiver.next() => {
                match message {
                    Some(Ok(message)) => {
                        if !process_caller_message(message, &mut session, provider.as_mut()).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(call_id = %session.id(), "Telephone socket error: {}", e);
                        break;
                    }
                    None => {
                        info!(call_id = %session.id(), "Caller disconnected");
                        break;
                    }
                }
            }
            route = route_rx.recv() => {
                match route {
                    Some(route) => {
                        if !handle_upstream_route(route, &mut session, &out_tx).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Whichever side ended first, both sockets are released here.
    session.close();
    if let Err(e) = provider.disconnect().await {
        debug!(call_id = %session.id(), "Upstream disconnect: {}", e);
    }
    let _ = out_tx.send(OutboundFrame::Close).await;
    drop(out_tx);
    let _ = sender_task.await;
    state.release_connection(&client_ip);
    debug!(call_id = %session.id(), "Session disposed");
}

/// Process one frame from the telephone socket.
///
/// Returns false when the call loop should end. Malformed frames are logged
/// with their raw payload and discarded; the call continues.
async fn process_caller_message(
    message: Message,
    session: &mut CallSession,
    provider: &mut dyn BaseRealtime,
) -> bool {
    match message {
        Message::Text(text) => {
            let event = match serde_json::from_str::<TwilioEvent>(text.as_str()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        call_id = %session.id(),
                        "Malformed caller frame: {} - {}", e, text
                    );
                    return true;
                }
            };
            match event {
                TwilioEvent::Start { start } => {
                    session.start_stream(&start.stream_sid);
                }
                TwilioEvent::Media { media } => {
                    if let Err(e) = media.validate() {
                        warn!(call_id = %session.id(), "Rejected media payload: {}", e);
                        return true;
                    }
                    if session.accept_inbound_media(provider.is_ready()) {
                        match provider.append_audio(&media.payload).await {
                            Ok(()) => {}
                            Err(RealtimeError::NotConnected) => {
                                // Readiness was lost between the gate and the send.
                                debug!(call_id = %session.id(), "Upstream went away mid-frame");
                            }
                            Err(e) => {
                                warn!(
                                    call_id = %session.id(),
                                    "Failed to forward caller audio: {}", e
                                );
                            }
                        }
                    }
                }
                TwilioEvent::Other => {
                    // Only this branch pays for a second parse, to name the event.
                    let kind = serde_json::from_str::<serde_json::Value>(text.as_str())
                        .ok()
                        .and_then(|value| {
                            value
                                .get("event")
                                .and_then(|e| e.as_str())
                                .map(str::to_string)
                        })
                        .unwrap_or_else(|| "unknown".to_string());
                    debug!(call_id = %session.id(), "Received non-media event: {}", kind);
                }
            }
            true
        }
        Message::Binary(data) => {
            debug!(
                call_id = %session.id(),
                "Ignoring {} byte binary frame", data.len()
            );
            true
        }
        Message::Close(_) => {
            info!(call_id = %session.id(), "Caller sent close frame");
            false
        }
        // axum answers pings on its own
        Message::Ping(_) | Message::Pong(_) => true,
    }
}

/// Handle one routed upstream event.
///
/// Returns false when the call loop should end.
async fn handle_upstream_route(
    route: UpstreamRoute,
    session: &mut CallSession,
    out_tx: &mpsc::Sender<OutboundFrame>,
) -> bool {
    match route {
        UpstreamRoute::AudioDelta(delta) => {
            if let Some(stream_sid) = session.accept_outbound_delta() {
                let frame = TwilioOutbound::media(stream_sid, delta);
                if out_tx.send(OutboundFrame::Frame(frame)).await.is_err() {
                    // Sender task gone, the telephone socket is dead.
                    return false;
                }
            }
            true
        }
        UpstreamRoute::Error(message) => {
            warn!(call_id = %session.id(), "Upstream error: {}", message);
            true
        }
        UpstreamRoute::Closed => {
            info!(call_id = %session.id(), "Upstream connection closed, ending call");
            false
        }
    }
}

/// Build the per-call provider configuration from the server configuration.
///
/// Telephone audio is G.711 u-law in both directions; turn taking uses the
/// provider's server-side VAD so the relay never has to detect speech.
fn build_realtime_config(config: &ServerConfig) -> RealtimeConfig {
    RealtimeConfig {
        api_key: config.openai_api_key.clone().unwrap_or_default(),
        model: config.realtime_model.clone(),
        voice: Some(config.realtime_voice.clone()),
        instructions: Some(config.system_instructions.clone()),
        temperature: Some(config.realtime_temperature),
        input_audio_format: Some("g711_ulaw".to_string()),
        output_audio_format: Some("g711_ulaw".to_string()),
        turn_detection: Some(TurnDetectionConfig::ServerVad {
            threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: None,
            create_response: None,
            interrupt_response: None,
        }),
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        endpoint: config.realtime_endpoint.clone(),
        config_send_delay_ms: config.config_send_delay_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::{ConnectionState, RealtimeResult};
    use crate::handlers::media::session::CallState;
    use std::sync::Mutex;

    /// Provider stand-in that records appended audio.
    struct MockRealtime {
        ready: bool,
        appended: Arc<Mutex<Vec<String>>>,
    }

    impl MockRealtime {
        fn ready() -> Self {
            Self {
                ready: true,
                appended: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn not_ready() -> Self {
            Self {
                ready: false,
                appended: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn appended(&self) -> Vec<String> {
            self.appended.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl BaseRealtime for MockRealtime {
        fn new(_config: RealtimeConfig) -> RealtimeResult<Self> {
            Ok(Self::not_ready())
        }

        async fn connect(&mut self) -> RealtimeResult<()> {
            self.ready = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> RealtimeResult<()> {
            self.ready = false;
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn get_connection_state(&self) -> ConnectionState {
            if self.ready {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            }
        }

        async fn append_audio(&mut self, audio: &str) -> RealtimeResult<()> {
            if !self.ready {
                return Err(RealtimeError::NotConnected);
            }
            self.appended.lock().unwrap().push(audio.to_string());
            Ok(())
        }

        fn on_audio_delta(
            &mut self,
            _callback: crate::core::realtime::AudioDeltaCallback,
        ) -> RealtimeResult<()> {
            Ok(())
        }

        fn on_error(
            &mut self,
            _callback: crate::core::realtime::RealtimeErrorCallback,
        ) -> RealtimeResult<()> {
            Ok(())
        }

        fn on_closed(
            &mut self,
            _callback: crate::core::realtime::ConnectionClosedCallback,
        ) -> RealtimeResult<()> {
            Ok(())
        }
    }

    fn text(json: &str) -> Message {
        Message::Text(json.to_string().into())
    }

    #[tokio::test]
    async fn test_media_frames_forward_in_arrival_order() {
        let mut session = CallSession::new();
        session.upstream_connected();
        session.start_stream("S1");
        let mut provider = MockRealtime::ready();

        for payload in ["QUJD", "REVG", "R0hJ"] {
            let frame = format!(r#"{{"event":"media","media":{{"payload":"{payload}"}}}}"#);
            assert!(process_caller_message(text(&frame), &mut session, &mut provider).await);
        }

        assert_eq!(provider.appended(), vec!["QUJD", "REVG", "R0hJ"]);
        assert_eq!(session.inbound_counts(), (3, 0));
    }

    #[tokio::test]
    async fn test_media_dropped_when_upstream_not_ready() {
        let mut session = CallSession::new();
        let mut provider = MockRealtime::not_ready();

        let frame = r#"{"event":"media","media":{"payload":"QUJD"}}"#;
        assert!(process_caller_message(text(frame), &mut session, &mut provider).await);

        assert!(provider.appended().is_empty(), "nothing may be queued");
        assert_eq!(session.inbound_counts(), (0, 1));
    }

    #[tokio::test]
    async fn test_media_forwarded_before_start_event() {
        // Forwarding gates on upstream readiness, not on the identifier.
        let mut session = CallSession::new();
        session.upstream_connected();
        let mut provider = MockRealtime::ready();

        let frame = r#"{"event":"media","media":{"payload":"QUJD"}}"#;
        assert!(process_caller_message(text(frame), &mut session, &mut provider).await);

        assert_eq!(provider.appended(), vec!["QUJD"]);
        assert_eq!(session.state(), CallState::AwaitingStreamStart);
    }

    #[tokio::test]
    async fn test_start_event_records_identifier() {
        let mut session = CallSession::new();
        session.upstream_connected();
        let mut provider = MockRealtime::ready();

        let frame = r#"{"event":"start","start":{"streamSid":"S1"}}"#;
        assert!(process_caller_message(text(frame), &mut session, &mut provider).await);

        assert_eq!(session.stream_sid(), Some("S1"));
        assert_eq!(session.state(), CallState::Active);
    }

    #[tokio::test]
    async fn test_malformed_frames_keep_the_call_alive() {
        let mut session = CallSession::new();
        session.upstream_connected();
        let mut provider = MockRealtime::ready();

        for raw in [
            "not json at all",
            r#"{"event":"media"}"#,
            r#"{"event":"media","media":{"payload":"!!!"}}"#,
            "{}",
        ] {
            assert!(
                process_caller_message(text(raw), &mut session, &mut provider).await,
                "for {raw}"
            );
        }

        assert!(provider.appended().is_empty());
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_unhandled_events_are_ignored() {
        let mut session = CallSession::new();
        session.upstream_connected();
        let mut provider = MockRealtime::ready();

        let frame = r#"{"event":"mark","streamSid":"S1","mark":{"name":"m1"}}"#;
        assert!(process_caller_message(text(frame), &mut session, &mut provider).await);
        assert!(provider.appended().is_empty());
    }

    #[tokio::test]
    async fn test_close_frame_ends_the_loop() {
        let mut session = CallSession::new();
        let mut provider = MockRealtime::ready();
        assert!(!process_caller_message(Message::Close(None), &mut session, &mut provider).await);
    }

    #[tokio::test]
    async fn test_delta_wrapped_with_recorded_identifier() {
        let mut session = CallSession::new();
        session.upstream_connected();
        session.start_stream("S1");
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let route = UpstreamRoute::AudioDelta("WFlX".to_string());
        assert!(handle_upstream_route(route, &mut session, &out_tx).await);

        match out_rx.try_recv() {
            Ok(OutboundFrame::Frame(frame)) => {
                let json = serde_json::to_value(&frame).unwrap();
                assert_eq!(json["event"], "media");
                assert_eq!(json["streamSid"], "S1");
                assert_eq!(json["media"]["payload"], "WFlX");
            }
            _ => panic!("Expected a media frame"),
        }
    }

    #[tokio::test]
    async fn test_delta_without_identifier_is_dropped() {
        let mut session = CallSession::new();
        session.upstream_connected();
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let route = UpstreamRoute::AudioDelta("WFlX".to_string());
        assert!(handle_upstream_route(route, &mut session, &out_tx).await);

        assert!(out_rx.try_recv().is_err());
        assert_eq!(session.outbound_counts(), (0, 1));
    }

    #[tokio::test]
    async fn test_upstream_error_does_not_end_the_call() {
        let mut session = CallSession::new();
        let (out_tx, _out_rx) = mpsc::channel(8);
        let route = UpstreamRoute::Error("rate limited".to_string());
        assert!(handle_upstream_route(route, &mut session, &out_tx).await);
    }

    #[tokio::test]
    async fn test_upstream_closure_ends_the_call() {
        let mut session = CallSession::new();
        let (out_tx, _out_rx) = mpsc::channel(8);
        assert!(!handle_upstream_route(UpstreamRoute::Closed, &mut session, &out_tx).await);
    }

    #[test]
    fn test_build_realtime_config() {
        let mut config = ServerConfig::default();
        config.openai_api_key = Some("sk-test".to_string());
        config.realtime_voice = "echo".to_string();
        config.system_instructions = "Be nice.".to_string();
        config.realtime_temperature = 0.8;

        let realtime = build_realtime_config(&config);
        assert_eq!(realtime.api_key, "sk-test");
        assert_eq!(realtime.voice.as_deref(), Some("echo"));
        assert_eq!(realtime.instructions.as_deref(), Some("Be nice."));
        assert_eq!(realtime.input_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(realtime.output_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(realtime.temperature, Some(0.8));
        assert!(matches!(
            realtime.turn_detection,
            Some(TurnDetectionConfig::ServerVad { .. })
        ));
    }
}

//! Base trait and types for realtime speech providers.
//!
//! The relay drives exactly one upstream speech connection per telephone
//! call. Providers implement `BaseRealtime`; the media-stream handler sees
//! only this trait plus the callback types below.
//!
//! # Connection model
//!
//! Connections are fail-fast: a lost socket ends the call session and is
//! never retried. Audio crosses the trait boundary as base64-encoded
//! payloads in both directions (G.711 u-law for telephony calls).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Fallback delay before sending the session configuration when the provider
/// never acknowledges the connection (milliseconds).
pub const DEFAULT_CONFIG_SEND_DELAY_MS: u64 = 1000;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Provider-reported error event
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Per-call configuration for a realtime provider.
///
/// Built once from the server configuration when a call arrives and sent to
/// the provider exactly once per connection (see
/// [`DEFAULT_CONFIG_SEND_DELAY_MS`] for the fallback timing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview-2024-10-01")
    #[serde(default)]
    pub model: String,

    /// Voice ID for synthesized output
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Temperature for response generation (0.0 to 2.0)
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Input audio format (e.g., "g711_ulaw")
    #[serde(default)]
    pub input_audio_format: Option<String>,

    /// Output audio format (e.g., "g711_ulaw")
    #[serde(default)]
    pub output_audio_format: Option<String>,

    /// Turn detection configuration
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,

    /// Response modalities (text, audio, or both)
    #[serde(default)]
    pub modalities: Option<Vec<String>>,

    /// Endpoint override. When unset the provider's public endpoint is used;
    /// set for self-hosted gateways and the integration test suite.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Fallback delay before the configuration send when no readiness event
    /// arrives (milliseconds).
    #[serde(default = "default_config_send_delay_ms")]
    pub config_send_delay_ms: u64,
}

fn default_config_send_delay_ms() -> u64 {
    DEFAULT_CONFIG_SEND_DELAY_MS
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            voice: None,
            instructions: None,
            temperature: None,
            input_audio_format: None,
            output_audio_format: None,
            turn_detection: None,
            modalities: None,
            endpoint: None,
            config_send_delay_ms: DEFAULT_CONFIG_SEND_DELAY_MS,
        }
    }
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
        /// Whether to auto-create a response on turn end
        #[serde(default)]
        create_response: Option<bool>,
        /// Interrupt model output on speech detection
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(true),
            interrupt_response: Some(true),
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state for realtime providers.
///
/// There is no reconnecting state: a failed or closed connection is terminal
/// for the call it belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for audio deltas produced by the provider.
///
/// The argument is the base64-encoded audio payload, ready to be wrapped in
/// a telephony media frame without re-encoding.
pub type AudioDeltaCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for error events.
pub type RealtimeErrorCallback =
    Arc<dyn Fn(RealtimeError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for connection closure.
///
/// Fires once when the provider socket ends for any reason, intentional or
/// not. The session treats it as a connection-level failure.
pub type ConnectionClosedCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Base Trait
// =============================================================================

/// Base trait for realtime speech providers.
///
/// One instance serves one telephone call. The handler connects it, streams
/// caller audio into it with [`append_audio`](BaseRealtime::append_audio),
/// and receives synthesized audio through the
/// [`on_audio_delta`](BaseRealtime::on_audio_delta) callback.
///
/// # Example
///
/// ```rust,ignore
/// use callbridge::core::realtime::{BaseRealtime, OpenAIRealtime, RealtimeConfig};
/// use std::sync::Arc;
///
/// let config = RealtimeConfig {
///     api_key: "sk-...".to_string(),
///     voice: Some("alloy".to_string()),
///     ..Default::default()
/// };
///
/// let mut provider = OpenAIRealtime::new(config)?;
/// provider.on_audio_delta(Arc::new(|delta| Box::pin(async move {
///     // wrap delta in a media frame and send it to the caller
/// })))?;
/// provider.connect().await?;
/// provider.append_audio("UExBWQ==").await?;
/// ```
#[async_trait]
pub trait BaseRealtime: Send + Sync {
    /// Create a new provider instance.
    fn new(config: RealtimeConfig) -> RealtimeResult<Self>
    where
        Self: Sized;

    /// Connect to the provider and start the session handshake.
    async fn connect(&mut self) -> RealtimeResult<()>;

    /// Disconnect from the provider.
    ///
    /// Idempotent; safe to call on an already-closed connection.
    async fn disconnect(&mut self) -> RealtimeResult<()>;

    /// Check if the provider is connected and accepting audio.
    fn is_ready(&self) -> bool;

    /// Get the current connection state.
    fn get_connection_state(&self) -> ConnectionState;

    /// Append base64-encoded audio to the provider's input buffer.
    ///
    /// Returns [`RealtimeError::NotConnected`] when the connection is not
    /// open. Callers gate on [`is_ready`](BaseRealtime::is_ready) and drop
    /// the frame instead of buffering it.
    async fn append_audio(&mut self, audio: &str) -> RealtimeResult<()>;

    /// Register a callback for audio deltas.
    fn on_audio_delta(&mut self, callback: AudioDeltaCallback) -> RealtimeResult<()>;

    /// Register a callback for error events.
    fn on_error(&mut self, callback: RealtimeErrorCallback) -> RealtimeResult<()>;

    /// Register a callback for connection closure.
    fn on_closed(&mut self, callback: ConnectionClosedCallback) -> RealtimeResult<()>;
}

/// Boxed trait object for realtime providers.
pub type BoxedRealtime = Box<dyn BaseRealtime>;

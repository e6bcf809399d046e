//! Realtime speech provider module.
//!
//! The upstream half of the relay: an outbound WebSocket connection to a
//! speech AI endpoint that consumes caller audio and produces synthesized
//! response audio.
//!
//! # Architecture
//!
//! - `BaseRealtime` trait for the provider seam
//! - `OpenAIRealtime` implementation over the OpenAI Realtime API
//! - Callback-based event delivery into the call session
//!
//! # Audio Format
//!
//! Telephony calls run G.711 u-law at 8kHz; payloads stay base64-encoded
//! across the whole relay, so no transcoding happens here.
//!
//! # Example
//!
//! ```rust,ignore
//! use callbridge::core::realtime::{BaseRealtime, OpenAIRealtime, RealtimeConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RealtimeConfig {
//!         api_key: "sk-...".to_string(),
//!         voice: Some("alloy".to_string()),
//!         input_audio_format: Some("g711_ulaw".to_string()),
//!         output_audio_format: Some("g711_ulaw".to_string()),
//!         ..Default::default()
//!     };
//!
//!     let mut provider = OpenAIRealtime::new(config).unwrap();
//!     provider.on_audio_delta(Arc::new(|delta| Box::pin(async move {
//!         println!("got {} base64 bytes", delta.len());
//!     }))).unwrap();
//!
//!     provider.connect().await.unwrap();
//!     provider.append_audio("UExBWQ==").await.unwrap();
//! }
//! ```

mod base;
pub mod openai;

pub use base::{
    AudioDeltaCallback, BaseRealtime, BoxedRealtime, ConnectionClosedCallback, ConnectionState,
    DEFAULT_CONFIG_SEND_DELAY_MS, RealtimeConfig, RealtimeError, RealtimeErrorCallback,
    RealtimeResult, TurnDetectionConfig,
};
pub use openai::{
    OPENAI_REALTIME_URL, OpenAIRealtime, OpenAIRealtimeAudioFormat, OpenAIRealtimeModel,
    OpenAIRealtimeVoice,
};

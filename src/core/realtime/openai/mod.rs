//! OpenAI Realtime API module.
//!
//! Speech-to-speech streaming over OpenAI's Realtime API, used as the
//! upstream side of the telephony relay.
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-realtime-preview-2024-10-01` - October 2024 version (default)
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Audio Format
//!
//! Telephone calls run G.711 u-law at 8kHz end to end; PCM 16-bit at 24kHz
//! is available for non-telephony callers.
//!
//! # Example
//!
//! ```rust,ignore
//! use callbridge::core::realtime::{BaseRealtime, RealtimeConfig, OpenAIRealtime};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RealtimeConfig {
//!         api_key: "sk-...".to_string(),
//!         voice: Some("alloy".to_string()),
//!         instructions: Some("You are a helpful assistant.".to_string()),
//!         ..Default::default()
//!     };
//!
//!     let mut realtime = OpenAIRealtime::new(config).unwrap();
//!
//!     realtime.on_audio_delta(Arc::new(|delta| Box::pin(async move {
//!         // relay delta to the caller
//!     }))).unwrap();
//!
//!     realtime.connect().await.unwrap();
//!     realtime.append_audio("UExBWQ==").await.unwrap();
//! }
//! ```

mod client;
mod config;
mod messages;

pub use client::OpenAIRealtime;
pub use config::{
    OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
pub use messages::{ApiError, ClientEvent, ServerEvent, SessionConfig, SessionInfo, TurnDetection};

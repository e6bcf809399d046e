//! HTTP and WebSocket request handlers
//!
//! This module organizes all handlers into logical groups:
//! - `api` - Health check endpoint
//! - `media` - Telephony media-stream WebSocket bridge (the relay core)
//! - `twiml` - TwiML voice-prompt endpoint for incoming calls

pub mod api;
pub mod media;
pub mod twiml;

// Re-export commonly used handlers for convenient access
pub use media::media_stream_handler;

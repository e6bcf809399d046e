//! Router construction
//!
//! - `api` - plain HTTP routes (health check, TwiML voice prompt)
//! - `media` - the `/media-stream` WebSocket route

pub mod api;
pub mod media;

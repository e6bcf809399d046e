//! Media-stream WebSocket route configuration
//!
//! This module configures the WebSocket endpoint the telephony provider
//! connects to for bidirectional call audio.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::media::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media-stream WebSocket router
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade for one call's audio stream
///
/// # Protocol
///
/// After the upgrade, the provider sends JSON text frames:
/// 1. `start` with the stream identifier for the call
/// 2. `media` frames carrying base64 G.711 u-law caller audio
///
/// The server responds with `media` frames carrying synthesized audio,
/// addressed with the recorded stream identifier.
///
/// # Connection limits
///
/// The connection-limit middleware runs before the upgrade (applied in
/// main.rs once state is available); a rejected call never reaches the
/// handler.
pub fn create_media_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}

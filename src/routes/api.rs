use axum::{Router, routing::any, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, twiml};
use crate::state::AppState;
use std::sync::Arc;

/// Create the plain HTTP router
///
/// # Endpoints
///
/// - `GET /` - health check
/// - `ANY /incoming-call` - TwiML voice prompt (Twilio posts here by default
///   but the method is configurable per phone number, so every method is
///   accepted)
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/incoming-call", any(twiml::incoming_call))
        .layer(TraceLayer::new_for_http())
}

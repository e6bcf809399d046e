//! Health check endpoint

use axum::Json;
use serde_json::{Value, json};

/// Health check handler for `GET /`.
///
/// Returns a static body so telephony-provider console checks and load
/// balancers can verify the server is up without touching the relay.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "message": "Twilio Media Stream Server is running!" }))
}

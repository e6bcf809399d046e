//! Voice-prompt (TwiML) endpoint
//!
//! Twilio fetches this endpoint when a call arrives, before opening the
//! media stream. The response greets the caller and then connects the call's
//! audio to the `/media-stream` WebSocket on this server. The callback URL
//! is derived from the request `Host` header so the same binary works behind
//! any hostname without configuration.

use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};

use crate::errors::{AppError, AppResult};

/// TwiML handler for `/incoming-call` (any HTTP method; Twilio uses POST by
/// default but can be configured to GET).
///
/// Media streams only run over TLS on the Twilio side, so the stream URL is
/// always `wss://`, independent of how this server itself is reached.
pub async fn incoming_call(headers: HeaderMap) -> AppResult<Response> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Host header".to_string()))?;

    let twiml = voice_response(host);
    Ok(([(header::CONTENT_TYPE, "text/xml")], twiml).into_response())
}

/// Build the TwiML voice response for one incoming call.
fn voice_response(host: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Say>Please wait while we connect your call to the A I voice assistant.</Say>
    <Pause length="1"/>
    <Say>O K, you can start talking!</Say>
    <Connect>
        <Stream url="wss://{host}/media-stream" />
    </Connect>
</Response>"#
    )
}

//! Telephony media-stream message types.
//!
//! Twilio Media Streams speaks JSON text frames over the call WebSocket.
//! Inbound frames carry an `event` discriminator; the relay acts on `start`
//! and `media` and logs everything else. Outbound frames are always `media`
//! envelopes addressed with the call's stream identifier.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum accepted base64 payload length for one media frame.
///
/// Twilio sends 20ms u-law chunks (a few hundred bytes); anything near this
/// bound is not telephone audio.
pub const MAX_MEDIA_PAYLOAD_LEN: usize = 64 * 1024;

// =============================================================================
// Inbound Events
// =============================================================================

/// Inbound events from the telephony provider.
///
/// Event kinds the relay does not act on (`connected`, `mark`, `stop`, ...)
/// all deserialize to [`TwilioEvent::Other`]; unknown fields inside known
/// events are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TwilioEvent {
    /// The stream is starting; carries the stream identifier.
    Start {
        /// Start metadata
        start: StreamStart,
    },
    /// One chunk of caller audio.
    Media {
        /// Audio payload
        media: MediaPayload,
    },
    /// Any other event kind.
    #[serde(other)]
    Other,
}

/// Metadata attached to a `start` event.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamStart {
    /// Provider-assigned stream identifier for this call.
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
}

/// Audio payload attached to a `media` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded G.711 u-law audio.
    pub payload: String,
}

impl MediaPayload {
    /// Validate the payload: bounded size and well-formed base64.
    ///
    /// The audio itself is never decoded for relaying; this only rejects
    /// frames that cannot possibly carry audio.
    pub fn validate(&self) -> Result<(), MediaPayloadError> {
        if self.payload.len() > MAX_MEDIA_PAYLOAD_LEN {
            return Err(MediaPayloadError::TooLarge(self.payload.len()));
        }
        BASE64
            .decode(&self.payload)
            .map(|_| ())
            .map_err(MediaPayloadError::NotBase64)
    }
}

/// Rejection reasons for a media payload.
#[derive(Debug, Error)]
pub enum MediaPayloadError {
    /// Payload length above [`MAX_MEDIA_PAYLOAD_LEN`]
    #[error("payload length {0} exceeds {MAX_MEDIA_PAYLOAD_LEN} bytes")]
    TooLarge(usize),

    /// Payload is not base64
    #[error("payload is not valid base64: {0}")]
    NotBase64(#[from] base64::DecodeError),
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// Outbound frames for the telephony provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TwilioOutbound {
    /// Synthesized audio bound for the caller.
    Media {
        /// Stream identifier recorded from the `start` event
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Audio payload
        media: MediaPayload,
    },
}

impl TwilioOutbound {
    /// Build a media frame from a provider audio delta.
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        TwilioOutbound::Media {
            stream_sid: stream_sid.into(),
            media: MediaPayload {
                payload: payload.into(),
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_event() {
        // Realistic frame: extra fields the relay does not read.
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC0000",
                "streamSid": "MZ18ad3ab5a668481ce02b83e7395059f0",
                "callSid": "CA0000",
                "tracks": ["inbound"],
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            },
            "streamSid": "MZ18ad3ab5a668481ce02b83e7395059f0"
        }"#;
        let event: TwilioEvent = serde_json::from_str(json).unwrap();
        match event {
            TwilioEvent::Start { start } => {
                assert_eq!(start.stream_sid, "MZ18ad3ab5a668481ce02b83e7395059f0");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_parse_media_event() {
        let json = r#"{
            "event": "media",
            "sequenceNumber": "3",
            "media": {
                "track": "inbound",
                "chunk": "2",
                "timestamp": "5",
                "payload": "QUJD"
            },
            "streamSid": "MZ0000"
        }"#;
        let event: TwilioEvent = serde_json::from_str(json).unwrap();
        match event {
            TwilioEvent::Media { media } => assert_eq!(media.payload, "QUJD"),
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_unhandled_events_parse_as_other() {
        for json in [
            r#"{"event": "connected", "protocol": "Call", "version": "1.0.0"}"#,
            r#"{"event": "mark", "streamSid": "MZ0000", "mark": {"name": "m1"}}"#,
            r#"{"event": "stop", "streamSid": "MZ0000"}"#,
        ] {
            let event: TwilioEvent = serde_json::from_str(json).unwrap();
            assert!(matches!(event, TwilioEvent::Other), "for {json}");
        }
    }

    #[test]
    fn test_media_event_without_payload_is_malformed() {
        let json = r#"{"event": "media", "streamSid": "MZ0000"}"#;
        assert!(serde_json::from_str::<TwilioEvent>(json).is_err());
    }

    #[test]
    fn test_non_json_is_malformed() {
        assert!(serde_json::from_str::<TwilioEvent>("not json at all").is_err());
    }

    #[test]
    fn test_outbound_media_wire_shape() {
        let frame = TwilioOutbound::media("S1", "WFlX");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "S1");
        assert_eq!(json["media"]["payload"], "WFlX");
    }

    #[test]
    fn test_payload_validation() {
        assert!(
            MediaPayload {
                payload: "QUJD".to_string()
            }
            .validate()
            .is_ok()
        );

        let err = MediaPayload {
            payload: "!!!not-base64!!!".to_string(),
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, MediaPayloadError::NotBase64(_)));

        let err = MediaPayload {
            payload: "A".repeat(MAX_MEDIA_PAYLOAD_LEN + 1),
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, MediaPayloadError::TooLarge(_)));
    }
}

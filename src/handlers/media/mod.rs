//! Telephony media-stream bridge
//!
//! This module is the downstream half of the relay plus the per-call glue:
//! - `handler` - WebSocket upgrade handler and the per-call relay loop
//! - `messages` - Twilio Media Streams wire types
//! - `session` - per-call state machine (identifier, lifecycle, drop policy)

pub mod handler;
pub mod messages;
pub mod session;

pub use handler::media_stream_handler;
pub use messages::{TwilioEvent, TwilioOutbound};
pub use session::{CallSession, CallState, DropPolicy};

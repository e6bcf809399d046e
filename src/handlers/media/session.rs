//! Per-call session state.
//!
//! One [`CallSession`] pairs one telephone connection with one upstream
//! speech connection. It owns the stream identifier, the lifecycle state,
//! and the forward-or-drop decisions for both audio directions; the handler
//! owns the sockets and consults the session for every frame.
//!
//! # Lifecycle
//!
//! `Connecting -> AwaitingStreamStart -> Active -> Closed`
//!
//! There is no error state and no retry: any failure moves the session to
//! `Closed`, which is terminal.

use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// State Types
// =============================================================================

/// Lifecycle state of one bridged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    /// Telephone socket accepted, upstream connection being established
    #[default]
    Connecting,
    /// Upstream open; the stream identifier has not arrived yet
    AwaitingStreamStart,
    /// Identifier known; full bidirectional relay
    Active,
    /// Either socket closed or failed; terminal
    Closed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Connecting => write!(f, "Connecting"),
            CallState::AwaitingStreamStart => write!(f, "AwaitingStreamStart"),
            CallState::Active => write!(f, "Active"),
            CallState::Closed => write!(f, "Closed"),
        }
    }
}

/// What happens to frames that cannot be forwarded right now.
///
/// Real-time audio is only useful now, so the relay never buffers. The enum
/// names the behavior so tests and logs can refer to it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    /// Drop the frame silently, count it, keep the call alive
    #[default]
    BestEffort,
}

// =============================================================================
// Call Session
// =============================================================================

/// Per-call relay state: identifier, lifecycle, and drop accounting.
///
/// Not shared across tasks; the media-stream handler owns it for the
/// duration of the call.
#[derive(Debug)]
pub struct CallSession {
    id: Uuid,
    state: CallState,
    stream_sid: Option<String>,
    drop_policy: DropPolicy,
    inbound_forwarded: u64,
    inbound_dropped: u64,
    outbound_forwarded: u64,
    outbound_dropped: u64,
}

impl CallSession {
    /// Create a session for a freshly accepted telephone connection.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: CallState::Connecting,
            stream_sid: None,
            drop_policy: DropPolicy::BestEffort,
            inbound_forwarded: 0,
            inbound_dropped: 0,
            outbound_forwarded: 0,
            outbound_dropped: 0,
        }
    }

    /// Call identifier for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CallState {
        self.state
    }

    /// The stream identifier, once the `start` event recorded it.
    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    /// The drop policy applied to unforwardable frames.
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// Frames relayed caller-to-provider and dropped on that path.
    pub fn inbound_counts(&self) -> (u64, u64) {
        (self.inbound_forwarded, self.inbound_dropped)
    }

    /// Frames relayed provider-to-caller and dropped on that path.
    pub fn outbound_counts(&self) -> (u64, u64) {
        (self.outbound_forwarded, self.outbound_dropped)
    }

    /// Mark the upstream connection as established.
    pub fn upstream_connected(&mut self) {
        if self.state == CallState::Connecting {
            self.state = CallState::AwaitingStreamStart;
        }
    }

    /// Record the stream identifier from the `start` event.
    ///
    /// The identifier is set exactly once; a repeated `start` keeps the
    /// first value. No-op once closed.
    pub fn start_stream(&mut self, stream_sid: &str) {
        if self.state == CallState::Closed {
            return;
        }
        match &self.stream_sid {
            Some(existing) => {
                warn!(
                    call_id = %self.id,
                    "Repeated start event (sid={}), keeping {}",
                    stream_sid, existing
                );
            }
            None => {
                info!(call_id = %self.id, "Incoming stream started: {}", stream_sid);
                self.stream_sid = Some(stream_sid.to_string());
                self.state = CallState::Active;
            }
        }
    }

    /// Decide what to do with one caller audio frame.
    ///
    /// Returns true when the frame goes upstream. Forwarding is gated only
    /// on upstream readiness; audio ahead of the `start` event still flows.
    pub fn accept_inbound_media(&mut self, upstream_ready: bool) -> bool {
        if self.state == CallState::Closed {
            self.inbound_dropped += 1;
            return false;
        }
        if upstream_ready {
            self.inbound_forwarded += 1;
            true
        } else {
            self.inbound_dropped += 1;
            debug!(
                call_id = %self.id,
                "Upstream not ready, dropping caller audio ({} dropped so far)",
                self.inbound_dropped
            );
            false
        }
    }

    /// Decide what to do with one synthesized audio delta.
    ///
    /// Returns the stream identifier the outbound frame must carry, or None
    /// when the frame has to drop (identifier unknown or call closed).
    pub fn accept_outbound_delta(&mut self) -> Option<String> {
        if self.state == CallState::Closed {
            self.outbound_dropped += 1;
            return None;
        }
        match &self.stream_sid {
            Some(sid) => {
                self.outbound_forwarded += 1;
                Some(sid.clone())
            }
            None => {
                self.outbound_dropped += 1;
                debug!(
                    call_id = %self.id,
                    "No stream identifier yet, dropping provider audio"
                );
                None
            }
        }
    }

    /// Move to the terminal state. Idempotent.
    pub fn close(&mut self) {
        if self.state == CallState::Closed {
            return;
        }
        self.state = CallState::Closed;
        info!(
            call_id = %self.id,
            "Call finished: {} frames up ({} dropped), {} frames down ({} dropped)",
            self.inbound_forwarded,
            self.inbound_dropped,
            self.outbound_forwarded,
            self.outbound_dropped
        );
    }

    /// Whether the session reached the terminal state.
    pub fn is_closed(&self) -> bool {
        self.state == CallState::Closed
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

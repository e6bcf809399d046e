//! Mock Provider Servers
//!
//! The relay's only remote dependency is the speech endpoint, so the mock
//! here is a scriptable Realtime API WebSocket server. Tests point the
//! bridge at it via the endpoint override and then inspect what the bridge
//! sent upstream or inject server events to be relayed back down.

// Allow dead code in test infrastructure - these utilities may be used by future tests
#![allow(dead_code)]

pub mod realtime_mock;

pub use realtime_mock::{MockBehavior, MockRealtimeServer};

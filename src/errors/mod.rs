//! Error types for the HTTP layer
//!
//! Relay-internal errors never reach these types: socket failures terminate
//! the affected call and are reported to logs only. `AppError` covers the
//! plain HTTP endpoints around the relay.

pub mod app_error;

pub use app_error::{AppError, AppResult};

pub mod realtime;

// Re-export commonly used types for convenience
pub use realtime::{
    BaseRealtime, BoxedRealtime, ConnectionState, OpenAIRealtime, RealtimeConfig, RealtimeError,
    RealtimeResult,
};

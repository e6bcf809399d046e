//! Shared application state
//!
//! One `AppState` lives for the whole process. It holds the immutable server
//! configuration plus the live-connection registry the connection-limit
//! middleware and the media-stream handler share. Call sessions themselves
//! are not stored here: each handler invocation owns its session exclusively,
//! so the only cross-session state is these lock-free counters.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;

/// Reasons a connection slot cannot be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    /// The global WebSocket connection limit has been reached
    GlobalLimitReached,
    /// The per-IP connection limit has been reached
    PerIpLimitReached,
}

/// Process-wide application state.
pub struct AppState {
    /// Server configuration (immutable after startup)
    pub config: ServerConfig,
    /// Total live WebSocket connections
    ws_connections: AtomicUsize,
    /// Live WebSocket connections per client IP
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Create the application state from the loaded configuration.
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Try to reserve a connection slot for a client.
    ///
    /// Checks the global limit first, then the per-IP limit. On success the
    /// caller must pair this with [`release_connection`](Self::release_connection)
    /// when the socket ends.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        if let Some(max) = self.config.max_websocket_connections {
            if self.ws_connections.load(Ordering::SeqCst) >= max {
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        }

        {
            let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
            if *per_ip >= self.config.max_connections_per_ip {
                return Err(ConnectionLimitError::PerIpLimitReached);
            }
            *per_ip += 1;
        }

        self.ws_connections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Release a previously acquired connection slot.
    ///
    /// Safe to call for an IP with no recorded connections (the counters
    /// never go negative).
    pub fn release_connection(&self, ip: &IpAddr) {
        let mut released = false;
        if let Some(mut per_ip) = self.ip_connections.get_mut(ip) {
            if *per_ip > 0 {
                *per_ip -= 1;
                released = true;
            }
        }
        // Drop empty entries so the map does not grow with one-off callers.
        self.ip_connections
            .remove_if(ip, |_, count| *count == 0);

        if released {
            let _ = self
                .ws_connections
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                    count.checked_sub(1)
                });
        }
    }

    /// Total live WebSocket connections.
    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    /// Live WebSocket connections for one client IP.
    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}

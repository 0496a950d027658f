//! Configuration for the central system
//!
//! Listener addresses, call timing and the backend collaborator.

use std::net::SocketAddr;
use std::time::Duration;

/// Complete central system configuration
#[derive(Debug, Clone)]
pub struct CentralConfig {
    /// WebSocket listener for charge points
    pub ws_addr: SocketAddr,

    /// HTTP listener for the admin API
    pub admin_addr: SocketAddr,

    /// Default timeout for calls to charge points
    pub call_timeout: Duration,

    /// Heartbeat interval (seconds) handed out in BootNotification replies
    pub heartbeat_interval: i32,

    /// Backend base URL; the in-memory backend is used when unset
    pub backend_url: Option<String>,

    /// Request timeout for backend calls
    pub backend_timeout: Duration,

    /// Capacity of each link's outbound queue
    pub outbound_queue: usize,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            admin_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            call_timeout: Duration::from_secs(8),
            heartbeat_interval: 60,
            backend_url: None,
            backend_timeout: Duration::from_secs(30),
            outbound_queue: 64,
        }
    }
}

impl CentralConfig {
    /// Create config with both listener addresses
    pub fn new(ws_addr: SocketAddr, admin_addr: SocketAddr) -> Self {
        Self {
            ws_addr,
            admin_addr,
            ..Default::default()
        }
    }

    /// Set the default call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the heartbeat interval in seconds
    pub fn with_heartbeat_interval(mut self, seconds: i32) -> Self {
        self.heartbeat_interval = seconds;
        self
    }

    /// Use the HTTP backend at `url`
    pub fn with_backend(mut self, url: impl Into<String>) -> Self {
        self.backend_url = Some(url.into());
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity;
        self
    }
}

//! WebSocket host settings.

use serde::{Deserialize, Serialize};

/// Network and socket limits for the WebSocket host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (0 picks an ephemeral port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Disconnect a peer silent for this long, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted frame in bytes.
    pub max_message_size: usize,
    /// Outbound frames queued per connection before new ones are dropped.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            max_connections: 50,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 16 * 1024 * 1024,
            send_queue_capacity: 256,
        }
    }
}

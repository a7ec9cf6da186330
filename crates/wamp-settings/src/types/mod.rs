//! Settings type definitions.
//!
//! All types use camelCase JSON and implement [`Default`], so a partial
//! settings file only needs the keys it changes.

mod logging;
mod rpc;
mod server;

pub use logging::LoggingSettings;
pub use rpc::RpcSettings;
pub use server::ServerSettings;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090, "maxConnections": 100 },
///   "rpc": { "callTimeoutMs": 30000 },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WampSettings {
    /// WebSocket host settings.
    pub server: ServerSettings,
    /// Call correlation and handler settings.
    pub rpc: RpcSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl WampSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if server.heartbeat_timeout_ms <= server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutMs ({}) must exceed heartbeatIntervalMs ({})",
                server.heartbeat_timeout_ms, server.heartbeat_interval_ms
            )));
        }
        if server.max_message_size == 0 || server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize and server.sendQueueCapacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

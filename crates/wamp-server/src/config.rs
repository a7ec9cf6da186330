//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wamp_rpc::ConnectionConfig;
use wamp_settings::WampSettings;

/// Configuration for the WebSocket host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Disconnect a peer that has not answered a ping for this long.
    pub heartbeat_timeout_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames queued per connection.
    pub send_queue_capacity: usize,
    /// Per-connection RPC behavior.
    pub rpc: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 50,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            send_queue_capacity: 256,
            rpc: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence allowed before disconnect.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&WampSettings> for ServerConfig {
    fn from(settings: &WampSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            heartbeat_interval_ms: server.heartbeat_interval_ms,
            heartbeat_timeout_ms: server.heartbeat_timeout_ms,
            max_message_size: server.max_message_size,
            send_queue_capacity: server.send_queue_capacity,
            rpc: ConnectionConfig {
                call_timeout_ms: settings.rpc.call_timeout_ms,
                handler_timeout_ms: settings.rpc.handler_timeout_ms,
                fail_pending_on_close: settings.rpc.fail_pending_on_close,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_connections, 50);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(90));
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
        assert!(cfg.rpc.fail_pending_on_close);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = ServerConfig {
            host: "0.0.0.0".into(),
            port: 9090,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9090");
    }

    #[test]
    fn built_from_settings() {
        let mut settings = WampSettings::default();
        settings.server.port = 7100;
        settings.server.max_connections = 3;
        settings.rpc.call_timeout_ms = Some(2_000);
        settings.rpc.fail_pending_on_close = false;

        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.port, 7100);
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.heartbeat_timeout_ms, settings.server.heartbeat_timeout_ms);
        assert_eq!(cfg.rpc.call_timeout_ms, Some(2_000));
        assert!(!cfg.rpc.fail_pending_on_close);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port": 3000}"#).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.send_queue_capacity, 256);
    }
}

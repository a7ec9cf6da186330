//! `/health` endpoint.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: String,
    /// When the server started (RFC 3339).
    pub started_at: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Outbound calls awaiting a response, across all connections.
    pub pending_calls: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    connections: usize,
    pending_calls: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        started_at: started_at.to_rfc3339(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        pending_calls,
    }
}

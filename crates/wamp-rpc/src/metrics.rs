//! Metric names recorded by the router and connection.
//!
//! Values go through the `metrics` facade; installing a recorder is up to
//! the host process.

/// Inbound requests dispatched to a handler (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// Inbound notifications received (counter, labels: handled).
pub const RPC_NOTIFICATIONS_TOTAL: &str = "rpc_notifications_total";
/// Protocol and handler errors answered (counter, labels: error_type).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// Handler wall time (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "rpc_request_duration_seconds";
/// Responses whose id matched no outstanding call (counter).
pub const RPC_UNMATCHED_RESPONSES_TOTAL: &str = "rpc_unmatched_responses_total";
/// Outbound calls issued (counter).
pub const RPC_CALLS_TOTAL: &str = "rpc_calls_total";
/// Outbound frames dropped because the transport refused them (counter, labels: reason).
pub const RPC_OUTBOUND_DROPS_TOTAL: &str = "rpc_outbound_drops_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            RPC_REQUESTS_TOTAL,
            RPC_NOTIFICATIONS_TOTAL,
            RPC_ERRORS_TOTAL,
            RPC_REQUEST_DURATION_SECONDS,
            RPC_UNMATCHED_RESPONSES_TOTAL,
            RPC_CALLS_TOTAL,
            RPC_OUTBOUND_DROPS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}

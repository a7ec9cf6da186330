//! Call correlation and handler settings.

use serde::{Deserialize, Serialize};

/// Per-connection RPC behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcSettings {
    /// Fail outbound calls unanswered after this many milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
    /// Answer requests whose handler runs longer than this with an internal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_timeout_ms: Option<u64>,
    /// Fail outstanding calls when a connection closes.
    pub fail_pending_on_close: bool,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: None,
            handler_timeout_ms: None,
            fail_pending_on_close: true,
        }
    }
}

//! RPC error codes, the wire error object, and local call failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Reserved protocol codes ─────────────────────────────────────────

/// Inbound text is not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Frame carries neither `id` nor `method`.
pub const INVALID_REQUEST: i64 = -32600;
/// No handler registered for the requested method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Handler rejected its parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Handler failed or timed out.
pub const INTERNAL_ERROR: i64 = -32603;

// ── Local call failures ─────────────────────────────────────────────

/// Call attempted while the transport was closed.
pub const TRANSPORT_CLOSED: i64 = -32000;
/// No response arrived within the configured call timeout.
pub const CALL_TIMED_OUT: i64 = -32001;
/// Connection closed with the call still outstanding.
pub const CONNECTION_CLOSED: i64 = -32002;

/// Error object carried in the `error` member of a response.
///
/// Application handlers may omit `code`; router-generated errors always
/// carry one of the reserved codes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ErrorObject {
    /// Numeric error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Build an error with a code.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            data: None,
        }
    }

    /// Build an application error without a code.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// `-32700 Parse error`.
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    /// `-32600 Invalid Request`.
    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    /// `-32601 Method not found`.
    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found")
    }

    /// `-32602` with a handler-supplied reason.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    /// `-32603` with a handler-supplied reason.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    /// Interpret an arbitrary `error` member received from a peer.
    ///
    /// Peers are free to send any JSON here; anything that is not an
    /// error-shaped object is kept verbatim as the message text.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<Self>(value.clone()) {
            Ok(err) => err,
            Err(_) => match value {
                Value::String(s) => Self::message(s),
                other => Self::message(other.to_string()),
            },
        }
    }
}

/// Failure delivered to the completion of an outbound call.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The peer answered with an error response.
    #[error("{0}")]
    Remote(ErrorObject),

    /// The transport was not open when the call was sent.
    #[error("transport is closed")]
    TransportClosed,

    /// No response arrived within the call timeout.
    #[error("call timed out after {0:?}")]
    TimedOut(Duration),

    /// The connection closed before a response arrived.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}

impl CallError {
    /// Numeric code for this failure, if any.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Remote(err) => err.code,
            Self::TransportClosed => Some(TRANSPORT_CLOSED),
            Self::TimedOut(_) => Some(CALL_TIMED_OUT),
            Self::ConnectionClosed => Some(CONNECTION_CLOSED),
        }
    }

    /// Wire view of this failure.
    ///
    /// Handlers that forward a nested call's failure to their own caller use
    /// this to produce the response error.
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Self::Remote(err) => err.clone(),
            other => ErrorObject {
                code: other.code(),
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl From<CallError> for ErrorObject {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Remote(inner) => inner,
            other => other.to_error_object(),
        }
    }
}

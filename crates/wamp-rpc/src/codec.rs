//! Wire codec: JSON text to [`Message`] and back.
//!
//! Classification is by key presence only:
//!
//! | `id` | `method` | class |
//! |------|----------|-------|
//! | yes  | no       | response |
//! | no   | yes      | notification |
//! | yes  | yes      | request |
//! | no   | no       | invalid |
//!
//! A `method` key holding a non-string value (including `null`) still counts
//! as present. Such a method name is kept as `None` and never matches a handler.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::ErrorObject;

/// Protocol version stamped on every outbound frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// One decoded wire frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Call expecting exactly one response.
    Request {
        /// Correlation id, echoed verbatim in the response.
        id: Value,
        /// Method name; `None` when the frame carried a non-string method.
        method: Option<String>,
        /// Optional parameters.
        params: Option<Value>,
    },
    /// Fire-and-forget event.
    Notification {
        /// Event name; `None` when the frame carried a non-string method.
        method: Option<String>,
        /// Optional parameters.
        params: Option<Value>,
    },
    /// Answer to an earlier request.
    Response {
        /// Id of the request being answered (`null` for protocol errors).
        id: Value,
        /// Result or error.
        outcome: Result<Value, ErrorObject>,
    },
}

impl Message {
    /// Outbound request with a numeric id.
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request {
            id: Value::from(id),
            method: Some(method.into()),
            params,
        }
    }

    /// Outbound notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: Some(method.into()),
            params,
        }
    }

    /// Response carrying either a result or an error.
    pub fn response(id: Value, outcome: Result<Value, ErrorObject>) -> Self {
        Self::Response { id, outcome }
    }

    /// Error response with a `null` id.
    pub fn protocol_error(error: ErrorObject) -> Self {
        Self::Response {
            id: Value::Null,
            outcome: Err(error),
        }
    }

    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Notification { .. } => "notification",
            Self::Response { .. } => "response",
        }
    }
}

/// Why an inbound frame could not be turned into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Text is not valid JSON.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Valid JSON that matches none of the message shapes.
    #[error("invalid request: {0}")]
    Invalid(&'static str),
}

/// Serialized frame layout. `error` is doubly optional so success responses
/// can carry an explicit `"error": null`.
#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<Option<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Option<&'a ErrorObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Value>,
    jsonrpc: &'static str,
}

/// Serialize a message to wire text.
pub fn encode(message: &Message) -> Result<String, serde_json::Error> {
    let envelope = match message {
        Message::Request { id, method, params } => Envelope {
            method: Some(method.as_deref()),
            params: params.as_ref(),
            result: None,
            error: None,
            id: Some(id),
            jsonrpc: JSONRPC_VERSION,
        },
        Message::Notification { method, params } => Envelope {
            method: Some(method.as_deref()),
            params: params.as_ref(),
            result: None,
            error: None,
            id: None,
            jsonrpc: JSONRPC_VERSION,
        },
        Message::Response { id, outcome } => {
            let (result, error) = match outcome {
                Ok(result) => (Some(result), Some(None)),
                Err(err) => (None, Some(Some(err))),
            };
            Envelope {
                method: None,
                params: None,
                result,
                error,
                id: Some(id),
                jsonrpc: JSONRPC_VERSION,
            }
        }
    };
    serde_json::to_string(&envelope)
}

/// Parse wire text into a message.
pub fn decode(text: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    classify(value)
}

/// Classify an already-parsed JSON value.
pub fn classify(value: Value) -> Result<Message, DecodeError> {
    let Value::Object(mut map) = value else {
        return Err(DecodeError::Invalid("frame is not a JSON object"));
    };

    let id = map.remove("id");
    let method = map
        .remove("method")
        .map(|m| m.as_str().map(str::to_owned));
    let params = map.remove("params");

    match (id, method) {
        (Some(id), None) => Ok(Message::Response {
            id,
            outcome: response_outcome(&mut map),
        }),
        (None, Some(method)) => Ok(Message::Notification { method, params }),
        (Some(id), Some(method)) => Ok(Message::Request { id, method, params }),
        (None, None) => Err(DecodeError::Invalid("frame has neither id nor method")),
    }
}

fn response_outcome(map: &mut Map<String, Value>) -> Result<Value, ErrorObject> {
    match map.remove("error") {
        Some(Value::Null) | None => Ok(map.remove("result").unwrap_or(Value::Null)),
        Some(err) => Err(ErrorObject::from_value(err)),
    }
}

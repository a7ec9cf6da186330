//! Inbound frame classification and dispatch.
//!
//! Every inbound frame ends in exactly one of: a resolved pending call, a
//! notification handed to its handler (or dropped), a request dispatched to
//! its handler (which answers once), or a protocol error reply.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, error, instrument, trace, warn};

use crate::codec::{self, DecodeError, Message};
use crate::connection::Connection;
use crate::errors::{self, CallError, ErrorObject};
use crate::metrics::{
    RPC_ERRORS_TOTAL, RPC_NOTIFICATIONS_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL,
    RPC_UNMATCHED_RESPONSES_TOTAL,
};
use crate::registry::{HandlerRegistry, MethodHandler};

/// What the router did with one inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Routed {
    /// Response-class frame; `matched` is whether a pending call consumed it.
    Resolved {
        /// Id carried by the response.
        id: Value,
        /// Whether an outstanding call was completed.
        matched: bool,
    },
    /// Notification-class frame; `handled` is whether a handler was found.
    Notified {
        /// Event name (`None` for a non-string method).
        method: Option<String>,
        /// Whether a handler was invoked.
        handled: bool,
    },
    /// Request-class frame handed to its handler.
    Dispatched {
        /// Method name.
        method: String,
    },
    /// Frame answered with a protocol error.
    Rejected {
        /// Reserved error code sent back.
        code: i64,
    },
}

/// Sends the single response owed to one inbound request.
///
/// Consumed on use, so a request can never be answered twice.
pub struct Responder {
    id: Value,
    method: String,
    conn: Connection,
}

impl Responder {
    /// Id of the request being answered.
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Method being answered.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Send the response, waiting for outbound queue space if needed.
    /// Returns whether the transport accepted it.
    pub async fn respond(self, outcome: Result<Value, ErrorObject>) -> bool {
        self.conn
            .send_reply(&Message::response(self.id, outcome))
            .await
    }
}

/// Per-connection frame router.
pub struct Router {
    registry: Arc<dyn HandlerRegistry>,
    handler_timeout: Option<Duration>,
}

impl Router {
    /// Create a router reading handlers from `registry`.
    pub fn new(registry: Arc<dyn HandlerRegistry>) -> Self {
        Self {
            registry,
            handler_timeout: None,
        }
    }

    /// Answer requests whose handler runs longer than `timeout` with an
    /// internal error.
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Handler registry this router reads.
    pub fn registry(&self) -> &Arc<dyn HandlerRegistry> {
        &self.registry
    }

    /// Classify and dispatch one inbound frame received on `conn`.
    ///
    /// Must run inside a Tokio runtime: handlers are spawned as tasks.
    #[instrument(skip_all, fields(connection = conn.id()))]
    pub fn route(&self, raw: &str, conn: &Connection) -> Routed {
        trace!(len = raw.len(), "inbound frame");

        let message = match codec::decode(raw) {
            Ok(message) => message,
            Err(DecodeError::Parse(e)) => {
                warn!(error = %e, "unparseable frame");
                return Self::reject(conn, Value::Null, ErrorObject::parse_error());
            }
            Err(DecodeError::Invalid(reason)) => {
                warn!(reason, "invalid frame");
                return Self::reject(conn, Value::Null, ErrorObject::invalid_request());
            }
        };

        match message {
            Message::Response { id, outcome } => Self::resolve(conn, id, outcome),
            Message::Notification { method, params } => self.notify(conn, method, params),
            Message::Request { id, method, params } => self.request(conn, id, method, params),
        }
    }

    /// Answer a frame that never decoded to text with a parse error.
    #[instrument(skip_all, fields(connection = conn.id()))]
    pub fn reject_unparseable(len: usize, conn: &Connection) -> Routed {
        warn!(len, "frame is not UTF-8");
        Self::reject(conn, Value::Null, ErrorObject::parse_error())
    }

    fn reject(conn: &Connection, id: Value, error: ErrorObject) -> Routed {
        let code = error.code.unwrap_or(errors::INTERNAL_ERROR);
        counter!(RPC_ERRORS_TOTAL, "error_type" => error_type(code)).increment(1);
        let reply = Message::response(id, Err(error));
        let peer = conn.clone();
        let _ = tokio::spawn(async move { peer.send_reply(&reply).await });
        Routed::Rejected { code }
    }

    fn resolve(conn: &Connection, id: Value, outcome: Result<Value, ErrorObject>) -> Routed {
        let matched = id
            .as_u64()
            .is_some_and(|n| conn.pending().resolve(n, outcome.map_err(CallError::Remote)));
        if !matched {
            counter!(RPC_UNMATCHED_RESPONSES_TOTAL).increment(1);
            debug!(%id, "response matched no outstanding call");
        }
        Routed::Resolved { id, matched }
    }

    fn notify(&self, conn: &Connection, method: Option<String>, params: Option<Value>) -> Routed {
        let handler = method.as_deref().and_then(|m| self.registry.lookup(m));
        let Some(handler) = handler else {
            counter!(RPC_NOTIFICATIONS_TOTAL, "handled" => "false").increment(1);
            debug!(method = ?method, "no handler for notification, dropping");
            return Routed::Notified {
                method,
                handled: false,
            };
        };

        counter!(RPC_NOTIFICATIONS_TOTAL, "handled" => "true").increment(1);
        let peer = conn.clone();
        let name = method.clone().unwrap_or_default();
        let _ = tokio::spawn(async move {
            let run = AssertUnwindSafe(handler.handle(params, &peer)).catch_unwind();
            match run.await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => debug!(method = name, error = %err, "notification handler failed"),
                Err(_) => error!(method = name, "notification handler panicked"),
            }
        });

        Routed::Notified {
            method,
            handled: true,
        }
    }

    fn request(
        &self,
        conn: &Connection,
        id: Value,
        method: Option<String>,
        params: Option<Value>,
    ) -> Routed {
        let found = method
            .as_deref()
            .and_then(|m| self.registry.lookup(m))
            .zip(method);
        let Some((handler, method)) = found else {
            debug!(%id, "request for unknown method");
            return Self::reject(conn, id, ErrorObject::method_not_found());
        };

        counter!(RPC_REQUESTS_TOTAL, "method" => method.clone()).increment(1);
        debug!(%id, method, "dispatching request");

        let responder = Responder {
            id,
            method: method.clone(),
            conn: conn.clone(),
        };
        let timeout = self.handler_timeout;
        let _ = tokio::spawn(async move {
            let start = Instant::now();
            let outcome = run_handler(&handler, params, &responder, timeout).await;
            histogram!(RPC_REQUEST_DURATION_SECONDS, "method" => responder.method.clone())
                .record(start.elapsed().as_secs_f64());
            if let Err(err) = &outcome {
                let code = err.code.map_or("application", error_type);
                counter!(RPC_ERRORS_TOTAL, "error_type" => code).increment(1);
            }
            let _ = responder.respond(outcome).await;
        });

        Routed::Dispatched { method }
    }
}

async fn run_handler(
    handler: &Arc<dyn MethodHandler>,
    params: Option<Value>,
    responder: &Responder,
    timeout: Option<Duration>,
) -> Result<Value, ErrorObject> {
    let run = AssertUnwindSafe(handler.handle(params, &responder.conn)).catch_unwind();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(result) => result,
            Err(_elapsed) => {
                error!(method = responder.method, "handler timed out after {limit:?}");
                return Err(ErrorObject::internal("Handler timed out"));
            }
        },
        None => run.await,
    };
    result.unwrap_or_else(|_| {
        error!(method = responder.method, "handler panicked");
        Err(ErrorObject::internal("Handler panicked"))
    })
}

fn error_type(code: i64) -> &'static str {
    match code {
        errors::PARSE_ERROR => "parse_error",
        errors::INVALID_REQUEST => "invalid_request",
        errors::METHOD_NOT_FOUND => "method_not_found",
        errors::INVALID_PARAMS => "invalid_params",
        errors::INTERNAL_ERROR => "internal_error",
        _ => "application",
    }
}

//! # wamp-rpc
//!
//! Symmetric JSON-RPC over a persistent duplex connection.
//!
//! Either endpoint may issue calls, send notifications, and answer the
//! peer's calls. The pieces, leaves first:
//!
//! - [`codec`]: wire format (`"jsonrpc": "2.0"` framing) and the [`Message`] sum type
//! - [`pending`]: correlation table mapping call ids to completions
//! - [`registry`]: handler lookup by method name
//! - [`router`]: per-frame classification and dispatch
//! - [`transport`]: the outbound send seam
//! - [`connection`]: binds a router, a pending table, and a transport together

#![deny(unsafe_code)]

pub mod codec;
pub mod connection;
pub mod errors;
pub mod metrics;
pub mod pending;
pub mod registry;
pub mod router;
pub mod transport;

pub use codec::{DecodeError, Message, decode, encode};
pub use connection::{Connection, ConnectionConfig};
pub use errors::{CallError, ErrorObject};
pub use pending::PendingCalls;
pub use registry::{HandlerRegistry, MethodHandler, MethodRegistry, handler_fn};
pub use router::{Responder, Routed, Router};
pub use transport::{ChannelTransport, Transport, TransportError};

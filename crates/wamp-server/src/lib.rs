//! # wamp-server
//!
//! WebSocket hosting for symmetric JSON-RPC peers.
//!
//! - [`server::WampServer`]: axum host with `/ws`, `/health`, and `/metrics`
//! - [`client::connect`]: outbound `tokio-tungstenite` connector
//! - [`connections::ConnectionSet`]: live peers and notification fan-out
//! - [`heartbeat`]: ping/pong liveness
//! - [`shutdown::ShutdownCoordinator`]: `CancellationToken` based shutdown
//! - [`demo`]: the reference handler set

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connections;
pub mod demo;
pub mod errors;
pub mod health;
pub mod heartbeat;
pub mod metrics;
pub mod server;
pub mod session;
pub mod shutdown;

pub use client::{ClientSession, connect};
pub use config::ServerConfig;
pub use connections::{ConnectionSet, ConnectionSlot, PeerState};
pub use errors::ServerError;
pub use server::WampServer;
pub use shutdown::ShutdownCoordinator;

//! `WampServer`: axum host for `/ws`, `/health`, and `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;
use wamp_rpc::HandlerRegistry;

use crate::config::ServerConfig;
use crate::connections::ConnectionSet;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::session::run_ws_session;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handlers every accepted peer is served with.
    pub registry: Arc<dyn HandlerRegistry>,
    /// Live peers.
    pub connections: Arc<ConnectionSet>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started (monotonic).
    pub start_time: Instant,
    /// When the server started (wall clock).
    pub started_at: DateTime<Utc>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// WebSocket host that serves one handler set to every connected peer.
pub struct WampServer {
    config: Arc<ServerConfig>,
    registry: Arc<dyn HandlerRegistry>,
    connections: Arc<ConnectionSet>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    started_at: DateTime<Utc>,
    metrics: Option<PrometheusHandle>,
}

impl WampServer {
    /// Create a server.
    pub fn new(config: ServerConfig, registry: Arc<dyn HandlerRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            connections: Arc::new(ConnectionSet::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            started_at: Utc::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            connections: self.connections.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            started_at: self.started_at,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    /// The task finishes once [`ShutdownCoordinator::shutdown`] fires and
    /// every peer has been closed.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!(%local_addr, "wamp server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let connections = self.connections.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server loop ended with error");
            }
            let closed = connections.close_all().await;
            info!(closed, "wamp server stopped");
        });

        Ok((local_addr, handle))
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handlers served to peers.
    pub fn registry(&self) -> &Arc<dyn HandlerRegistry> {
        &self.registry
    }

    /// Live peers.
    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.connections
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let Some(slot) = state.connections.try_claim(state.config.max_connections) else {
        warn!(
            active = state.connections.claimed(),
            max = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let peer_id = format!("conn_{}", Uuid::now_v7());
    let cancel = state.shutdown.child_token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(
                socket,
                peer_id,
                slot,
                state.registry,
                state.config,
                state.connections,
                cancel,
            )
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.connections.len().await;
    let pending = state.connections.pending_calls().await;
    Json(health::health_check(
        state.start_time,
        state.started_at,
        connections,
        pending,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, crate::metrics::render(handle)).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

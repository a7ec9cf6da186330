//! Server-side WebSocket session: one connected peer from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wamp_rpc::{ChannelTransport, Connection, HandlerRegistry};

use crate::config::ServerConfig;
use crate::connections::{ConnectionSet, ConnectionSlot, PeerState};
use crate::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Shortest ping interval the session will run with.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// How long the writer gets to flush a close frame before it is aborted.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Run a WebSocket session for one connected peer.
///
/// `slot` is held for the life of the session and released once the peer
/// is deregistered.
///
/// 1. Binds a [`Connection`] to the socket and registers it in `connections`
/// 2. Dispatches inbound text (and UTF-8 binary) frames to the router
/// 3. Forwards queued outbound frames and sends periodic pings
/// 4. Ends on close, read error, heartbeat timeout, or `cancel`
/// 5. Closes the connection, failing its outstanding calls
#[instrument(skip_all, fields(connection = %peer_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    peer_id: String,
    slot: ConnectionSlot,
    registry: Arc<dyn HandlerRegistry>,
    config: Arc<ServerConfig>,
    connections: Arc<ConnectionSet>,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<String>(config.send_queue_capacity.max(1));
    let transport = Arc::new(ChannelTransport::new(send_tx));
    let connection = Connection::new(
        peer_id.clone(),
        transport.clone(),
        registry,
        config.rpc.clone(),
    );
    let peer = Arc::new(PeerState::new(connection.clone(), transport));
    connections.add(peer.clone()).await;

    let started = Instant::now();
    info!("peer connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let interval = config.heartbeat_interval().max(MIN_HEARTBEAT_INTERVAL);
    let timeout = config.heartbeat_timeout();

    // Outbound: queued frames and pings.
    let writer_cancel = cancel.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(interval);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        writer_cancel.cancel();
    });

    let heartbeat_peer = peer.clone();
    let heartbeat_cancel = cancel.clone();
    let heartbeat = tokio::spawn(async move {
        let result =
            run_heartbeat(heartbeat_peer, interval, timeout, heartbeat_cancel.clone()).await;
        if result == HeartbeatResult::TimedOut {
            warn!("peer unresponsive for {timeout:?}, disconnecting");
            heartbeat_cancel.cancel();
        }
    });

    // Inbound.
    let reason = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "socket read failed");
                        break "error";
                    }
                    None => break "eof",
                };
                peer.mark_alive();
                match msg {
                    Message::Text(text) => {
                        let _ = connection.dispatch(text.as_str());
                    }
                    Message::Binary(data) => {
                        let _ = match std::str::from_utf8(&data) {
                            Ok(text) => connection.dispatch(text),
                            Err(_) => connection.reject_unparseable(data.len()),
                        };
                    }
                    Message::Close(_) => {
                        debug!("peer sent close frame");
                        break "close";
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            () = cancel.cancelled() => break "cancelled",
        }
    };

    cancel.cancel();
    let failed_calls = connection.close();
    let _ = connections.remove(&peer_id).await;
    drop(slot);
    heartbeat.abort();
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(reason, failed_calls, dropped = peer.drop_count(), "peer disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

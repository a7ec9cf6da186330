//! Outbound peer: dial a wamp host and serve handlers over the same socket.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wamp_rpc::{CallError, ChannelTransport, Connection, ConnectionConfig, HandlerRegistry};

use crate::errors::ServerError;

const SEND_QUEUE_CAPACITY: usize = 256;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// A live client-side connection and its socket driver task.
///
/// Dropping the session cancels the driver, which closes the socket and
/// fails any outstanding calls.
pub struct ClientSession {
    connection: Connection,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ClientSession {
    /// The RPC connection bound to the socket.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Call `method` on the remote peer and wait for its response.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        self.connection.call(method, params).await
    }

    /// Send a notification to the remote peer.
    pub fn notify(&self, method: &str, params: Option<Value>) -> bool {
        self.connection.notify(method, params)
    }

    /// Whether the socket has gone away.
    pub fn is_closed(&self) -> bool {
        !self.connection.is_open()
    }

    /// Close the socket and wait briefly for the driver to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                debug!(connection = self.connection.id(), "client driver did not stop in time");
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("connection", &self.connection.id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Dial `url` and bind a [`Connection`] serving `registry` to the socket.
///
/// The returned session can call the host; the host can call back into any
/// handler in `registry`.
pub async fn connect(
    url: &str,
    registry: Arc<dyn HandlerRegistry>,
    config: ConnectionConfig,
) -> Result<ClientSession, ServerError> {
    let (ws, _response) = connect_async(url)
        .await
        .map_err(|e| ServerError::Connect {
            url: url.to_string(),
            source: Box::new(e),
        })?;

    let id = format!("client_{}", Uuid::now_v7());
    let (send_tx, mut send_rx) = mpsc::channel::<String>(SEND_QUEUE_CAPACITY);
    let transport = Arc::new(ChannelTransport::new(send_tx));
    let connection = Connection::new(id.clone(), transport, registry, config);
    info!(connection = %id, url, "connected to peer");

    let cancel = CancellationToken::new();
    let driver_cancel = cancel.clone();
    let driver_conn = connection.clone();
    let task = tokio::spawn(async move {
        let (mut sink, mut stream) = ws.split();
        let reason = loop {
            tokio::select! {
                out = send_rx.recv() => {
                    let Some(text) = out else { break "transport closed" };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(connection = driver_conn.id(), error = %e, "socket write failed");
                        break "write error";
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = driver_conn.dispatch(text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = match std::str::from_utf8(&data) {
                            Ok(text) => driver_conn.dispatch(text),
                            Err(_) => driver_conn.reject_unparseable(data.len()),
                        };
                    }
                    Some(Ok(Message::Close(_))) | None => break "remote closed",
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(connection = driver_conn.id(), error = %e, "socket read failed");
                        break "read error";
                    }
                },
                () = driver_cancel.cancelled() => {
                    // flush what was queued before the close was requested
                    while let Ok(text) = send_rx.try_recv() {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    break "closed locally";
                }
            }
        };
        let failed_calls = driver_conn.close();
        info!(connection = driver_conn.id(), reason, failed_calls, "peer connection ended");
    });

    Ok(ClientSession {
        connection,
        cancel,
        task: Some(task),
    })
}

//! One live peer: router, pending-call table, and outbound transport bound
//! together.

use std::sync::{Arc, Weak};
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::codec::{self, Message};
use crate::errors::CallError;
use crate::metrics::{RPC_CALLS_TOTAL, RPC_OUTBOUND_DROPS_TOTAL};
use crate::pending::{Completion, PendingCalls};
use crate::registry::HandlerRegistry;
use crate::router::{Routed, Router};
use crate::transport::{Transport, TransportError};

/// Per-connection behavior knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Fail outbound calls with no response after this many milliseconds.
    pub call_timeout_ms: Option<u64>,
    /// Answer inbound requests whose handler exceeds this many milliseconds
    /// with an internal error.
    pub handler_timeout_ms: Option<u64>,
    /// Fail outstanding calls when the connection closes.
    pub fail_pending_on_close: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: None,
            handler_timeout_ms: None,
            fail_pending_on_close: true,
        }
    }
}

impl ConnectionConfig {
    fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}

struct Inner {
    id: String,
    transport: Arc<dyn Transport>,
    router: Router,
    pending: PendingCalls,
    config: ConnectionConfig,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.config.fail_pending_on_close {
            let _ = self.pending.fail_all(&CallError::ConnectionClosed);
        }
    }
}

/// Handle to one peer. Cheap to clone; clones share state.
///
/// Both directions run over the same connection: [`call`](Self::call) and
/// [`notify`](Self::notify) go out, and frames handed to
/// [`dispatch`](Self::dispatch) come in.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Bind a transport and handler registry into a connection.
    pub fn new(
        id: impl Into<String>,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn HandlerRegistry>,
        config: ConnectionConfig,
    ) -> Self {
        let router = Router::new(registry).with_handler_timeout(config.handler_timeout());
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                transport,
                router,
                pending: PendingCalls::new(),
                config,
            }),
        }
    }

    /// Connection id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Registry serving the peer's calls.
    pub fn registry(&self) -> &Arc<dyn HandlerRegistry> {
        self.inner.router.registry()
    }

    /// Behavior knobs this connection was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Whether the transport accepts frames.
    pub fn is_open(&self) -> bool {
        self.inner.transport.is_open()
    }

    /// Route one inbound text frame.
    pub fn dispatch(&self, raw: &str) -> Routed {
        self.inner.router.route(raw, self)
    }

    /// Answer an inbound frame of `len` bytes that is not UTF-8 with a
    /// parse error carrying a null id.
    pub fn reject_unparseable(&self, len: usize) -> Routed {
        Router::reject_unparseable(len, self)
    }

    /// Issue a call and run `callback` exactly once with its outcome.
    ///
    /// The id is registered before the request is written, so the response
    /// cannot overtake the registration. On a closed transport the callback
    /// runs immediately with [`CallError::TransportClosed`].
    pub fn call_with<F>(&self, method: &str, params: Option<Value>, callback: F)
    where
        F: FnOnce(Result<Value, CallError>) + Send + 'static,
    {
        if !self.is_open() {
            debug!(connection = self.id(), method, "call on closed transport");
            callback(Err(CallError::TransportClosed));
            return;
        }

        // the timer slot is filled after the request is written
        let timer: Arc<Mutex<Option<AbortHandle>>> = Arc::new(Mutex::new(None));
        let slot = timer.clone();
        let completion: Completion = Box::new(move |outcome| {
            if let Some(handle) = slot.lock().take() {
                handle.abort();
            }
            callback(outcome);
        });

        let id = self.inner.pending.allocate(completion);
        counter!(RPC_CALLS_TOTAL).increment(1);
        debug!(connection = self.id(), id, method, "outbound call");

        if let Err(err) = self.write(&Message::request(id, method, params)) {
            warn!(connection = self.id(), id, method, error = %err, "call not sent");
            let _ = self.inner.pending.resolve(id, Err(CallError::TransportClosed));
            return;
        }

        if let Some(handle) = self.arm_call_timeout(id) {
            *timer.lock() = Some(handle);
            // answered before the timer was stored
            if !self.inner.pending.contains(id) {
                if let Some(handle) = timer.lock().take() {
                    handle.abort();
                }
            }
        }
    }

    /// Issue a call and wait for its outcome.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        let (tx, rx) = oneshot::channel();
        self.call_with(method, params, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.unwrap_or(Err(CallError::ConnectionClosed))
    }

    /// Send a notification. Returns whether the transport accepted it.
    pub fn notify(&self, method: &str, params: Option<Value>) -> bool {
        self.send_message(&Message::notification(method, params))
    }

    /// Encode and send one message. Returns whether the transport accepted it.
    ///
    /// Refused frames are logged and counted, never retried.
    pub fn send_message(&self, message: &Message) -> bool {
        match self.write(message) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    connection = self.id(),
                    kind = message.kind(),
                    error = %err,
                    "outbound frame dropped"
                );
                false
            }
        }
    }

    /// Send a response owed to the peer, waiting for queue space when the
    /// outbound queue is full. Returns whether the frame was queued.
    pub async fn send_reply(&self, message: &Message) -> bool {
        let Some(text) = self.encode(message) else {
            return false;
        };
        match self.inner.transport.send_wait(text).await {
            Ok(()) => true,
            Err(err) => {
                counter!(RPC_OUTBOUND_DROPS_TOTAL, "reason" => drop_reason(err)).increment(1);
                warn!(
                    connection = self.id(),
                    kind = message.kind(),
                    error = %err,
                    "outbound frame dropped"
                );
                false
            }
        }
    }

    /// Close the transport. Outstanding calls fail with
    /// [`CallError::ConnectionClosed`] unless the config says otherwise.
    ///
    /// Returns how many calls were failed. Idempotent.
    pub fn close(&self) -> usize {
        self.inner.transport.close();
        if !self.inner.config.fail_pending_on_close {
            return 0;
        }
        let failed = self.inner.pending.fail_all(&CallError::ConnectionClosed);
        if failed > 0 {
            debug!(connection = self.id(), failed, "failed outstanding calls on close");
        }
        failed
    }

    /// Number of outbound calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.inner.pending
    }

    fn encode(&self, message: &Message) -> Option<String> {
        codec::encode(message)
            .inspect_err(|e| {
                error!(connection = self.id(), error = %e, "failed to encode outbound frame");
            })
            .ok()
    }

    fn write(&self, message: &Message) -> Result<(), TransportError> {
        let text = self.encode(message).ok_or(TransportError::Closed)?;
        self.inner.transport.send(text).inspect_err(|err| {
            counter!(RPC_OUTBOUND_DROPS_TOTAL, "reason" => drop_reason(*err)).increment(1);
        })
    }

    fn arm_call_timeout(&self, id: u64) -> Option<AbortHandle> {
        let limit = self.inner.config.call_timeout()?;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(connection = self.id(), id, "no runtime, call timeout not armed");
            return None;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = runtime.spawn(async move {
            tokio::time::sleep(limit).await;
            if let Some(inner) = weak.upgrade() {
                if inner.pending.resolve(id, Err(CallError::TimedOut(limit))) {
                    debug!(connection = inner.id, id, "call timed out");
                }
            }
        });
        Some(task.abort_handle())
    }
}

fn drop_reason(err: TransportError) -> &'static str {
    match err {
        TransportError::Closed => "closed",
        TransportError::Full => "full",
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{self, ErrorObject};
    use crate::registry::{MethodRegistry, handler_fn};
    use crate::transport::ChannelTransport;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(1);

    fn make_conn(config: ConnectionConfig) -> (Connection, mpsc::Receiver<String>) {
        make_conn_with_capacity(config, 64)
    }

    fn make_conn_with_capacity(
        config: ConnectionConfig,
        capacity: usize,
    ) -> (Connection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection::new(
            "conn_test",
            Arc::new(ChannelTransport::new(tx)),
            Arc::new(MethodRegistry::new()),
            config,
        );
        (conn, rx)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> Value {
        let text = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("no outbound frame")
            .expect("channel closed");
        serde_json::from_str(&text).unwrap()
    }

    async fn pump(mut rx: mpsc::Receiver<String>, to: Connection) {
        while let Some(text) = rx.recv().await {
            let _ = to.dispatch(&text);
        }
    }

    /// Two connections wired back to back in memory.
    fn pair(a_registry: Arc<MethodRegistry>, b_registry: Arc<MethodRegistry>) -> (Connection, Connection) {
        let (a_tx, a_rx) = mpsc::channel(64);
        let (b_tx, b_rx) = mpsc::channel(64);
        let a = Connection::new(
            "a",
            Arc::new(ChannelTransport::new(a_tx)),
            a_registry,
            ConnectionConfig::default(),
        );
        let b = Connection::new(
            "b",
            Arc::new(ChannelTransport::new(b_tx)),
            b_registry,
            ConnectionConfig::default(),
        );
        let _ = tokio::spawn(pump(a_rx, b.clone()));
        let _ = tokio::spawn(pump(b_rx, a.clone()));
        (a, b)
    }

    #[test]
    fn default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.call_timeout_ms, None);
        assert_eq!(config.handler_timeout_ms, None);
        assert!(config.fail_pending_on_close);
    }

    #[test]
    fn config_deserializes_camel_case_with_defaults() {
        let config: ConnectionConfig = serde_json::from_str(r#"{"callTimeoutMs": 250}"#).unwrap();
        assert_eq!(config.call_timeout_ms, Some(250));
        assert!(config.fail_pending_on_close);
    }

    // ── Outbound ────────────────────────────────────────────────────

    #[tokio::test]
    async fn call_writes_request_and_resolves_on_response() {
        let (conn, mut rx) = make_conn(ConnectionConfig::default());
        let caller = conn.clone();
        let call = tokio::spawn(async move { caller.call("getNumber", None).await });

        let request = next_frame(&mut rx).await;
        assert_eq!(
            request,
            json!({"method": "getNumber", "id": 1, "jsonrpc": "2.0"})
        );
        assert_eq!(conn.pending_calls(), 1);

        let _ = conn.dispatch(r#"{"result": 128, "error": null, "id": 1, "jsonrpc": "2.0"}"#);
        assert_eq!(call.await.unwrap(), Ok(json!(128)));
        assert_eq!(conn.pending_calls(), 0);
    }

    #[tokio::test]
    async fn call_ids_increase_per_connection() {
        let (conn, mut rx) = make_conn(ConnectionConfig::default());
        for expected in 1..=3 {
            conn.call_with("m", Some(json!([expected])), |_| {});
            let frame = next_frame(&mut rx).await;
            assert_eq!(frame["id"], expected);
            assert_eq!(frame["params"], json!([expected]));
        }

        let (other, mut other_rx) = make_conn(ConnectionConfig::default());
        other.call_with("m", None, |_| {});
        assert_eq!(next_frame(&mut other_rx).await["id"], 1);
    }

    #[tokio::test]
    async fn call_on_closed_transport_fails_immediately() {
        let (conn, mut rx) = make_conn(ConnectionConfig::default());
        let _ = conn.close();
        assert!(!conn.is_open());

        let outcome = conn.call("getTrue", None).await;
        assert_eq!(outcome, Err(CallError::TransportClosed));
        assert_eq!(conn.pending_calls(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn call_into_full_queue_fails_and_clears_entry() {
        let (conn, _rx) = make_conn_with_capacity(ConnectionConfig::default(), 1);
        assert!(conn.notify("filler", None));
        let outcome = conn.call("getTrue", None).await;
        assert_eq!(outcome, Err(CallError::TransportClosed));
        assert_eq!(conn.pending_calls(), 0);
    }

    #[tokio::test]
    async fn notify_writes_frame_without_id() {
        let (conn, mut rx) = make_conn(ConnectionConfig::default());
        assert!(conn.notify("tick", Some(json!({"n": 1}))));
        let frame = next_frame(&mut rx).await;
        assert_eq!(
            frame,
            json!({"method": "tick", "params": {"n": 1}, "jsonrpc": "2.0"})
        );
    }

    #[tokio::test]
    async fn dropped_frame_is_logged() {
        let (logs, _guard) = wamp_logging::capture_logs();
        let (conn, _rx) = make_conn_with_capacity(ConnectionConfig::default(), 1);
        assert!(conn.notify("first", None));
        assert!(!conn.notify("second", None));
        assert!(logs.has_event(tracing::Level::WARN, "outbound frame dropped"));
    }

    #[tokio::test]
    async fn notify_on_closed_transport_returns_false() {
        let (conn, _rx) = make_conn(ConnectionConfig::default());
        let _ = conn.close();
        assert!(!conn.notify("tick", None));
    }

    // ── Timeouts and close ──────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn call_times_out_without_response() {
        let (conn, mut rx) = make_conn(ConnectionConfig {
            call_timeout_ms: Some(500),
            ..ConnectionConfig::default()
        });
        let caller = conn.clone();
        let call = tokio::spawn(async move { caller.call("slow", None).await });
        let _ = next_frame(&mut rx).await;

        let outcome = call.await.unwrap();
        assert_eq!(outcome, Err(CallError::TimedOut(Duration::from_millis(500))));
        assert_eq!(outcome.unwrap_err().code(), Some(errors::CALL_TIMED_OUT));

        let late = conn.dispatch(r#"{"result": 1, "error": null, "id": 1}"#);
        assert_eq!(late, Routed::Resolved { id: json!(1), matched: false });
    }

    #[tokio::test(start_paused = true)]
    async fn answered_call_is_not_timed_out() {
        let (conn, mut rx) = make_conn(ConnectionConfig {
            call_timeout_ms: Some(500),
            ..ConnectionConfig::default()
        });
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        conn.call_with("m", None, move |outcome| {
            let _ = done_tx.send(outcome);
        });
        let _ = next_frame(&mut rx).await;
        let _ = conn.dispatch(r#"{"result": "ok", "error": null, "id": 1}"#);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(done_rx.recv().await.unwrap(), Ok(json!("ok")));
        assert!(done_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn answered_call_releases_its_timer() {
        let (conn, mut rx) = make_conn(ConnectionConfig {
            call_timeout_ms: Some(86_400_000),
            ..ConnectionConfig::default()
        });
        conn.call_with("m", None, |_| {});
        let _ = next_frame(&mut rx).await;
        // the armed timer is the only weak holder
        assert_eq!(Arc::weak_count(&conn.inner), 1);

        let _ = conn.dispatch(r#"{"result": 1, "error": null, "id": 1}"#);
        tokio::time::timeout(WAIT, async {
            while Arc::weak_count(&conn.inner) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timer task still alive after the call was answered");
    }

    #[tokio::test]
    async fn replies_wait_for_space_while_notifications_drop() {
        let (conn, mut rx) = make_conn_with_capacity(ConnectionConfig::default(), 1);
        assert!(conn.notify("first", None));
        assert!(!conn.notify("second", None));

        let replier = conn.clone();
        let reply = tokio::spawn(async move {
            replier
                .send_reply(&Message::response(json!(9), Ok(json!("done"))))
                .await
        });
        tokio::task::yield_now().await;
        assert!(!reply.is_finished());

        assert_eq!(next_frame(&mut rx).await["method"], "first");
        assert!(reply.await.unwrap());
        assert_eq!(next_frame(&mut rx).await["id"], 9);
    }

    #[tokio::test]
    async fn close_fails_outstanding_calls() {
        let (conn, mut rx) = make_conn(ConnectionConfig::default());
        let caller = conn.clone();
        let call = tokio::spawn(async move { caller.call("never", None).await });
        let _ = next_frame(&mut rx).await;

        assert_eq!(conn.close(), 1);
        assert_eq!(call.await.unwrap(), Err(CallError::ConnectionClosed));
        assert_eq!(conn.close(), 0);
    }

    #[tokio::test]
    async fn close_can_leave_calls_outstanding() {
        let (conn, mut rx) = make_conn(ConnectionConfig {
            fail_pending_on_close: false,
            ..ConnectionConfig::default()
        });
        conn.call_with("never", None, |_| panic!("must not complete"));
        let _ = next_frame(&mut rx).await;

        assert_eq!(conn.close(), 0);
        assert_eq!(conn.pending_calls(), 1);
    }

    // ── Both directions ─────────────────────────────────────────────

    #[tokio::test]
    async fn peers_call_each_other() {
        let a_registry = Arc::new(MethodRegistry::new());
        let b_registry = Arc::new(MethodRegistry::new());
        a_registry.add("getString", handler_fn(|_, _| async { Ok(json!("cjs-wamp")) }));
        b_registry.add("getTrue", handler_fn(|_, _| async { Ok(json!(true)) }));
        let (a, b) = pair(a_registry, b_registry);

        let (from_b, from_a) = tokio::join!(b.call("getString", None), a.call("getTrue", None));
        assert_eq!(from_b, Ok(json!("cjs-wamp")));
        assert_eq!(from_a, Ok(json!(true)));
    }

    #[tokio::test]
    async fn handler_calls_back_into_its_caller() {
        let a_registry = Arc::new(MethodRegistry::new());
        let b_registry = Arc::new(MethodRegistry::new());
        a_registry.add(
            "rpc",
            handler_fn(|params, peer| async move {
                peer.call("sum", params).await.map_err(ErrorObject::from)
            }),
        );
        b_registry.add(
            "sum",
            handler_fn(|params, _| async move {
                let params = params.unwrap_or(Value::Null);
                let x = params["x"].as_i64().unwrap_or(0);
                let y = params["y"].as_i64().unwrap_or(0);
                Ok(json!(x + y))
            }),
        );
        let (_a, b) = pair(a_registry, b_registry);

        let result = tokio::time::timeout(WAIT, b.call("rpc", Some(json!({"x": 6, "y": 8}))))
            .await
            .unwrap();
        assert_eq!(result, Ok(json!(14)));
    }

    #[tokio::test]
    async fn nested_failure_is_forwarded() {
        let a_registry = Arc::new(MethodRegistry::new());
        a_registry.add(
            "rpc",
            handler_fn(|params, peer| async move {
                peer.call("missing", params).await.map_err(ErrorObject::from)
            }),
        );
        let (_a, b) = pair(a_registry, Arc::new(MethodRegistry::new()));

        let outcome = tokio::time::timeout(WAIT, b.call("rpc", None)).await.unwrap();
        assert_matches!(outcome, Err(CallError::Remote(err)) if err.code == Some(errors::METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn unknown_method_reaches_caller_as_remote_error() {
        let (a, _b) = pair(Arc::new(MethodRegistry::new()), Arc::new(MethodRegistry::new()));
        let outcome = tokio::time::timeout(WAIT, a.call("qwe", None)).await.unwrap();
        assert_eq!(outcome, Err(CallError::Remote(ErrorObject::method_not_found())));
    }
}

//! Live peers and notification fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use wamp_rpc::{ChannelTransport, Connection};

use crate::metrics::WS_FANOUT_DROPS_TOTAL;

/// One connected peer: its RPC connection plus socket liveness.
pub struct PeerState {
    connection: Connection,
    transport: Arc<ChannelTransport>,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
}

impl PeerState {
    /// Wrap a connection and the channel transport it writes through.
    pub fn new(connection: Connection, transport: Arc<ChannelTransport>) -> Self {
        let now = Instant::now();
        Self {
            connection,
            transport,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
        }
    }

    /// Connection id.
    pub fn id(&self) -> &str {
        self.connection.id()
    }

    /// RPC connection to this peer.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Record socket activity (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Read and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last recorded activity.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Outbound frames dropped because the send queue was full.
    pub fn drop_count(&self) -> u64 {
        self.transport.drop_count()
    }
}

/// A claimed place under the connection limit. Released on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    claimed: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.claimed.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Connected peers indexed by connection id.
pub struct ConnectionSet {
    peers: RwLock<HashMap<String, Arc<PeerState>>>,
    claimed: Arc<AtomicUsize>,
}

impl ConnectionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            claimed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Claim a slot if fewer than `max` are held.
    ///
    /// Slots are taken before the WebSocket upgrade, so handshakes racing
    /// each other cannot overshoot `max`.
    pub fn try_claim(&self, max: usize) -> Option<ConnectionSlot> {
        let _ = self
            .claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < max).then_some(held + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            claimed: self.claimed.clone(),
        })
    }

    /// Slots currently held, including handshakes not yet registered.
    pub fn claimed(&self) -> usize {
        self.claimed.load(Ordering::Acquire)
    }

    /// Track a peer.
    pub async fn add(&self, peer: Arc<PeerState>) {
        let mut peers = self.peers.write().await;
        let _ = peers.insert(peer.id().to_owned(), peer);
    }

    /// Stop tracking a peer.
    pub async fn remove(&self, id: &str) -> Option<Arc<PeerState>> {
        self.peers.write().await.remove(id)
    }

    /// Connection for `id`, if still connected.
    pub async fn get(&self, id: &str) -> Option<Connection> {
        self.peers
            .read()
            .await
            .get(id)
            .map(|peer| peer.connection().clone())
    }

    /// Number of tracked peers.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peers are tracked.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Tracked connection ids (sorted).
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Outbound calls awaiting a response, summed over all peers.
    pub async fn pending_calls(&self) -> usize {
        self.peers
            .read()
            .await
            .values()
            .map(|peer| peer.connection().pending_calls())
            .sum()
    }

    /// Send a notification to every peer. Returns how many accepted it.
    pub async fn notify_all(&self, method: &str, params: Option<Value>) -> usize {
        let peers = self.peers.read().await;
        let mut delivered = 0;
        for peer in peers.values() {
            if peer.connection().notify(method, params.clone()) {
                delivered += 1;
            } else {
                counter!(WS_FANOUT_DROPS_TOTAL).increment(1);
                warn!(connection = peer.id(), method, "notification not delivered");
            }
        }
        debug!(method, recipients = peers.len(), delivered, "notified all peers");
        delivered
    }

    /// Close every tracked connection. Returns how many calls were failed.
    pub async fn close_all(&self) -> usize {
        self.peers
            .read()
            .await
            .values()
            .map(|peer| peer.connection().close())
            .sum()
    }
}

impl Default for ConnectionSet {
    fn default() -> Self {
        Self::new()
    }
}

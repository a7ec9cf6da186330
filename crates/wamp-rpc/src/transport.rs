//! Outbound transport seam.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Why a frame could not be handed to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport is closed.
    #[error("transport is closed")]
    Closed,
    /// The outbound queue is full.
    #[error("send queue is full")]
    Full,
}

/// Message-oriented duplex link, outbound half.
///
/// Inbound frames are pushed into [`Connection::dispatch`](crate::Connection::dispatch)
/// by whoever owns the socket.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether frames can currently be sent.
    fn is_open(&self) -> bool;

    /// Queue one text frame. A full queue refuses the frame.
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Queue one text frame, waiting for space when the queue is full.
    ///
    /// Used for responses, which the peer is owed.
    async fn send_wait(&self, text: String) -> Result<(), TransportError>;

    /// Stop accepting frames.
    fn close(&self);
}

/// Transport backed by a bounded channel drained by a socket writer task.
pub struct ChannelTransport {
    tx: mpsc::Sender<String>,
    open: AtomicBool,
    dropped: AtomicU64,
}

impl ChannelTransport {
    /// Wrap the sending half of the writer task's queue.
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx,
            open: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        }
    }

    /// Frames dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        match self.tx.try_send(text) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    async fn send_wait(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.tx.send(text).await.map_err(|_| TransportError::Closed)
    }

    /// Mark the transport closed. Later sends fail with [`TransportError::Closed`].
    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("open", &self.is_open())
            .field("dropped", &self.drop_count())
            .finish()
    }
}

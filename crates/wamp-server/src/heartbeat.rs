//! Ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connections::PeerState;

/// Outcome of the heartbeat loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Consecutive silent intervals tolerated before a peer counts as dead.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Watch a peer's alive flag until it goes silent or `cancel` fires.
///
/// The flag is set by any inbound frame (pongs included) and cleared at
/// every `interval` tick. [`max_missed`] consecutive clear ticks end the
/// loop with [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    peer: Arc<PeerState>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    let _ = ticker.tick().await;

    let limit = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if peer.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    debug!(connection = peer.id(), missed, limit, "peer missed heartbeat");
                    if missed >= limit {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

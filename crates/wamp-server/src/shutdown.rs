//! Graceful shutdown via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::graceful_shutdown`] waits by default.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared cancellation for the listener and every socket session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// The root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the root but cancellable on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Fire the shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire on Ctrl-C. Returns the signal listener error, if any.
    pub async fn shutdown_on_ctrl_c(&self) -> std::io::Result<()> {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("ctrl-c received, shutting down");
                self.shutdown();
            }
            () = self.token.cancelled() => {}
        }
        Ok(())
    }

    /// Fire the shutdown, then wait up to `timeout` for `handles` to finish.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(tasks = handles.len(), ?timeout, "draining tasks");

        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_fires_once_called() {
        let coord = ShutdownCoordinator::default();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn child_tokens_follow_root_but_not_back() {
        let coord = ShutdownCoordinator::new();
        let session = coord.child_token();
        let other = coord.child_token();

        session.cancel();
        assert!(!coord.is_shutting_down());
        assert!(!other.is_cancelled());

        coord.shutdown();
        assert!(other.is_cancelled());
        assert!(coord.token().is_cancelled());
    }

    #[tokio::test]
    async fn ctrl_c_wait_ends_on_manual_shutdown() {
        let coord = std::sync::Arc::new(ShutdownCoordinator::new());
        let waiter = coord.clone();
        let handle = tokio::spawn(async move { waiter.shutdown_on_ctrl_c().await });
        coord.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move { token.cancelled().await });

        coord.graceful_shutdown(vec![handle], None).await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_gives_up_after_timeout() {
        let coord = ShutdownCoordinator::new();
        let stubborn = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        coord
            .graceful_shutdown(vec![stubborn], Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
    }
}

//! One-shot latch between reconciliation and the dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// How long the dispatch loop waits for reconciliation by default.
pub const DEFAULT_BARRIER_TIMEOUT: Duration = Duration::from_secs(30);

/// Released once by the reconciler and awaited by the dispatch loop.
///
/// A barrier that expects no reconciler starts released.
#[derive(Clone)]
pub struct InitializationBarrier {
    released: Arc<watch::Sender<bool>>,
    timeout: Duration,
}

impl InitializationBarrier {
    pub fn new(expects_reconciler: bool) -> Self {
        let (released, _) = watch::channel(!expects_reconciler);
        Self {
            released: Arc::new(released),
            timeout: DEFAULT_BARRIER_TIMEOUT,
        }
    }

    /// A barrier that never blocks.
    pub fn released() -> Self {
        Self::new(false)
    }

    /// Set how long [`wait`](Self::wait) blocks before giving up.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open the barrier. Further calls have no effect.
    pub fn release(&self) {
        self.released.send_replace(true);
    }

    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Wait until released or the timeout elapses.
    ///
    /// Returns whether the barrier was released. A timeout is logged and the
    /// caller is expected to proceed anyway.
    pub async fn wait(&self) -> bool {
        let mut rx = self.released.subscribe();
        match tokio::time::timeout(self.timeout, rx.wait_for(|released| *released)).await {
            Ok(Ok(_)) => true,
            // The sender lives in `self`, so the channel cannot close here.
            Ok(Err(_)) => self.is_released(),
            Err(_) => {
                tracing::error!(
                    timeout = ?self.timeout,
                    "Timed out waiting for job reconciliation, starting scheduler anyway"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_reconciler_is_prereleased() {
        let barrier = InitializationBarrier::new(false);
        assert!(barrier.is_released());
        assert!(barrier.wait().await);
    }

    #[tokio::test]
    async fn test_wait_returns_on_release() {
        let barrier = InitializationBarrier::new(true);
        assert!(!barrier.is_released());

        let waiter = barrier.clone();
        let task = tokio::spawn(async move { waiter.wait().await });
        tokio::task::yield_now().await;
        barrier.release();

        assert!(task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let barrier = InitializationBarrier::new(true).with_timeout(Duration::from_secs(30));

        let start = tokio::time::Instant::now();
        assert!(!barrier.wait().await);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let barrier = InitializationBarrier::new(true);
        barrier.release();
        barrier.release();
        assert!(barrier.wait().await);
    }
}

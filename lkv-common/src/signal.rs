//! # Stop Flags
//!
//! Cooperative cancellation for the long-running loops (listener, connection
//! workers, reaper, snapshot task).
//!
//! A [`StopFlag`] is a one-shot latch: once set it stays set. Loops either
//! check [`StopFlag::is_set`] after each bounded wait, or race their wait
//! against [`StopFlag::wait`] so they wake as soon as the flag flips.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Shared, clonable cancellation latch.
#[derive(Clone, Debug)]
pub struct StopFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl StopFlag {
    /// Creates a flag in the "running" state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        StopFlag { tx: Arc::new(tx) }
    }

    /// Sets the flag and wakes every waiter. Setting twice is a no-op.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once the flag has been set.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves when the flag is set (immediately if it already is).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleeps for `period` unless the flag is set first.
    ///
    /// Returns true if the caller should stop.
    pub async fn sleep_or_stopped(&self, period: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.wait() => true,
            _ = tokio::time::sleep(period) => self.is_set(),
        }
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn set_is_sticky_and_idempotent() {
        let flag = StopFlag::new();
        assert!(!flag.is_set());
        flag.set();
        flag.set();
        assert!(flag.is_set());
        assert!(flag.clone().is_set());
    }

    #[tokio::test]
    async fn wait_wakes_on_set() {
        let flag = StopFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.set();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn sleep_is_cut_short_by_stop() {
        let flag = StopFlag::new();
        assert!(!flag.sleep_or_stopped(Duration::from_millis(5)).await);

        let setter = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            setter.set();
        });

        let started = Instant::now();
        assert!(flag.sleep_or_stopped(Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

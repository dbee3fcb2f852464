//! # Snapshot Task
//!
//! Background loop that persists the store whenever it is dirty.
//!
//! The task wakes every `period`; if there are unsaved writes it saves the
//! map on the blocking pool, otherwise it does nothing. Stopping the task
//! through [`SnapshotHandle::stop`] joins it and runs one last conditional
//! save.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use lkv_common::{KvError, KvResult, StopFlag};

use crate::storage::Storage;

/// Handle to a running snapshot task.
pub struct SnapshotHandle {
    stop: StopFlag,
    task: JoinHandle<()>,
    storage: Arc<Storage>,
}

impl SnapshotHandle {
    /// Stops the task, waits for it, then saves once more if dirty.
    pub async fn stop(self) -> KvResult<()> {
        self.stop.set();
        self.task.await.map_err(|err| KvError::Join {
            task: "snapshot",
            reason: err.to_string(),
        })?;

        let storage = self.storage;
        let saved = tokio::task::spawn_blocking(move || storage.flush_if_dirty())
            .await
            .map_err(|err| KvError::Join {
                task: "final snapshot",
                reason: err.to_string(),
            })??;
        debug!(saved, "snapshot task stopped");
        Ok(())
    }
}

impl Storage {
    /// Spawns the snapshot task on the current tokio runtime.
    pub fn start_snapshotter(self: &Arc<Self>, period: Duration) -> SnapshotHandle {
        let stop = StopFlag::new();
        let task = tokio::spawn(run_snapshotter(Arc::clone(self), period, stop.clone()));

        SnapshotHandle {
            stop,
            task,
            storage: Arc::clone(self),
        }
    }
}

async fn run_snapshotter(storage: Arc<Storage>, period: Duration, stop: StopFlag) {
    debug!(period_ms = period.as_millis() as u64, "snapshot task started");

    while !stop.sleep_or_stopped(period).await {
        if !storage.is_dirty() {
            continue;
        }
        let storage = Arc::clone(&storage);
        match tokio::task::spawn_blocking(move || storage.flush_if_dirty()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => error!(error = %err, "periodic snapshot failed"),
            Err(err) => error!(error = %err, "periodic snapshot panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn saves_dirty_store_periodically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        let storage = Arc::new(Storage::open(&path));
        let handle = storage.start_snapshotter(Duration::from_millis(20));

        storage.write("color".into(), "red".into());

        let mut saved = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if !storage.is_dirty() {
                saved = true;
                break;
            }
        }
        assert!(saved, "snapshot task should clear the dirty flag");
        assert_eq!(fs::read_to_string(&path).unwrap(), "color=red\n");

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_performs_final_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        let storage = Arc::new(Storage::open(&path));
        let handle = storage.start_snapshotter(Duration::from_secs(3600));

        storage.write("late".into(), "write".into());
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("stop should not wait for the full period")
            .unwrap();

        assert!(!storage.is_dirty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "late=write\n");
    }

    #[tokio::test]
    async fn clean_store_is_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        let storage = Arc::new(Storage::open(&path));
        let handle = storage.start_snapshotter(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await.unwrap();

        assert!(!path.exists());
    }
}

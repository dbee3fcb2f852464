//! # Worker Registry
//!
//! Track connection workers from spawn to join.
//!
//! ## Design Principles
//!
//! 1. **Two Lists, Two Locks**: Active handles and finished ids are guarded by
//!    separate mutexes so connection churn does not contend with reaping more
//!    than necessary. Lock order is always active, then finished.
//! 2. **Self-Reported Completion**: A worker pushes its own id to the finished
//!    list as its last action (even when it panics) and never joins itself.
//! 3. **Exactly-Once Join**: A handle is removed from the active map under the
//!    lock before it is awaited, so the reaper and the shutdown drain can never
//!    both join it.
//! 4. **No Await Under Lock**: Handles are collected under the locks and
//!    awaited after the guards are released.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use lkv_common::StopFlag;

/// Identity of a connection worker, unique for the life of the server.
pub type WorkerId = u64;

/// Active connection workers plus those that finished but are not joined yet.
pub struct WorkerRegistry {
    active: Mutex<HashMap<WorkerId, JoinHandle<()>>>,
    finished: Mutex<Vec<WorkerId>>,
    next_id: AtomicU64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry {
            active: Mutex::new(HashMap::new()),
            finished: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawns a worker and registers its handle.
    ///
    /// `worker` receives the id assigned to it. The registry lock is held
    /// across the spawn so the reaper never sees the id before the handle.
    pub fn spawn<F, Fut>(self: &Arc<Self>, worker: F) -> WorkerId
    where
        F: FnOnce(WorkerId) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let work = worker(id);
        let guard = FinishGuard {
            registry: Arc::clone(self),
            id,
        };

        let mut active = self.active.lock();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await;
        });
        active.insert(id, handle);
        id
    }

    /// Records that worker `id` has stopped executing.
    pub fn mark_finished(&self, id: WorkerId) {
        self.finished.lock().push(id);
    }

    /// Number of workers registered and not yet joined.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Number of workers reported finished and not yet joined.
    pub fn finished_count(&self) -> usize {
        self.finished.lock().len()
    }

    /// Joins every worker that reported completion. Returns how many.
    pub async fn reap(&self) -> usize {
        let ready = {
            let mut active = self.active.lock();
            let mut finished = self.finished.lock();
            let mut ready = Vec::with_capacity(finished.len());
            finished.retain(|id| match active.remove(id) {
                Some(handle) => {
                    ready.push((*id, handle));
                    false
                }
                None => true,
            });
            ready
        };

        let count = ready.len();
        join_workers(ready).await;
        count
    }

    /// Joins every registered worker, running or finished. Used at shutdown.
    pub async fn join_all(&self) -> usize {
        let mut joined = 0;
        loop {
            let pending: Vec<_> = {
                let mut active = self.active.lock();
                self.finished.lock().clear();
                active.drain().collect()
            };
            if pending.is_empty() {
                return joined;
            }
            joined += pending.len();
            join_workers(pending).await;
        }
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reports the worker finished when its task ends, including by panic.
struct FinishGuard {
    registry: Arc<WorkerRegistry>,
    id: WorkerId,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.registry.mark_finished(self.id);
    }
}

async fn join_workers(workers: Vec<(WorkerId, JoinHandle<()>)>) {
    for (id, handle) in workers {
        match handle.await {
            Ok(()) => trace!(worker = id, "joined connection worker"),
            Err(err) => warn!(worker = id, error = %err, "connection worker did not finish cleanly"),
        }
    }
}

/// Periodically joins finished workers until `stop` is set.
///
/// Still-running workers are left alone; they are joined at shutdown.
pub async fn run_reaper(registry: Arc<WorkerRegistry>, interval: Duration, stop: StopFlag) {
    debug!(interval_ms = interval.as_millis() as u64, "reaper started");
    while !stop.sleep_or_stopped(interval).await {
        match registry.reap().await {
            0 => trace!("nothing to join"),
            reaped => debug!(reaped, active = registry.active_count(), "reaped connection workers"),
        }
    }
    debug!("reaper stopped");
}

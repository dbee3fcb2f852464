//! # Shared Storage
//!
//! Thread-safe string map with a dirty flag, usage counters and snapshot
//! persistence.
//!
//! ## Design Principles
//!
//! 1. **Single Lock**: One mutex guards the map and its write generation, so a
//!    read always observes a completed write.
//! 2. **Lock-Free Counters**: Read/write totals are `AtomicU64` and can be
//!    sampled at any time without touching the data lock.
//! 3. **Copy Then Write**: A snapshot holds the data lock only while cloning
//!    the map; file I/O happens outside it.
//! 4. **No Lost Dirty Bits**: The dirty flag is cleared only if no write landed
//!    between the copy and the end of the save.
//!
//! ## Notes
//! - Counters use `Ordering::Relaxed`; they are for reporting only.
//! - Dropping the last reference performs a final save if the map is dirty.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use lkv_common::KvResult;

use crate::engine::KvStore;
use crate::persistence::{KvMap, Persistence, codec_for_path};

/// Point-in-time copy of the usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Total `read` calls, hits and misses alike.
    pub reads: u64,
    /// Total `write` calls.
    pub writes: u64,
}

impl StorageStats {
    /// Returns the counter increase since `earlier`.
    pub fn delta_since(&self, earlier: &StorageStats) -> StorageStats {
        StorageStats {
            reads: self.reads.saturating_sub(earlier.reads),
            writes: self.writes.saturating_sub(earlier.writes),
        }
    }
}

struct Table {
    entries: KvMap,
    /// Bumped on every write; lets a save detect writes that raced it.
    generation: u64,
}

/// Key/value store backed by a snapshot file.
pub struct Storage {
    data: Mutex<Table>,
    dirty: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    /// Serializes saves so an older copy never overwrites a newer file.
    save_lock: Mutex<()>,
    path: PathBuf,
    persistence: Box<dyn Persistence>,
}

impl Storage {
    /// Opens the store at `path`, choosing the codec from the extension.
    ///
    /// A missing or unreadable file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let persistence = codec_for_path(&path);
        Self::with_persistence(path, persistence)
    }

    /// Opens the store at `path` with an explicit persistence codec.
    pub fn with_persistence(path: impl Into<PathBuf>, persistence: Box<dyn Persistence>) -> Self {
        let path = path.into();
        let entries = load_config(&path, persistence.as_ref());

        Storage {
            data: Mutex::new(Table {
                entries,
                generation: 0,
            }),
            dirty: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            save_lock: Mutex::new(()),
            path,
            persistence,
        }
    }

    /// Returns the value for `key`, or an empty string if absent.
    pub fn read(&self, key: &str) -> String {
        let value = {
            let table = self.data.lock();
            table.entries.get(key).cloned().unwrap_or_default()
        };
        self.reads.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Inserts or overwrites `key` and marks the store dirty.
    pub fn write(&self, key: String, value: String) {
        {
            let mut table = self.data.lock();
            table.entries.insert(key, value);
            table.generation += 1;
            self.dirty.store(true, Ordering::Release);
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the read/write counters.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    /// Returns true if there are writes not yet saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.lock().entries.len()
    }

    /// Returns true if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all entries sorted by key.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = {
            let table = self.data.lock();
            table
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        entries.sort();
        entries
    }

    /// Writes the current map to the snapshot file.
    pub fn save(&self) -> KvResult<()> {
        let _saving = self.save_lock.lock();

        let (snapshot, generation) = {
            let table = self.data.lock();
            (table.entries.clone(), table.generation)
        };

        self.persistence.save(&self.path, &snapshot)?;

        {
            let table = self.data.lock();
            if table.generation == generation {
                self.dirty.store(false, Ordering::Release);
            }
        }
        trace!(entries = snapshot.len(), path = %self.path.display(), "snapshot saved");
        Ok(())
    }

    /// Saves only if there are unsaved writes. Returns true if it saved.
    pub fn flush_if_dirty(&self) -> KvResult<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }
}

impl KvStore for Storage {
    fn read(&self, key: &str) -> String {
        Storage::read(self, key)
    }

    fn write(&self, key: String, value: String) {
        Storage::write(self, key, value)
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "closing storage");
        if let Err(err) = self.flush_if_dirty() {
            error!(error = %err, "final snapshot failed");
        }
    }
}

fn load_config(path: &Path, persistence: &dyn Persistence) -> KvMap {
    match persistence.load(path) {
        Ok(entries) if entries.is_empty() && !path.exists() => {
            info!(path = %path.display(), "snapshot file not found, starting with empty storage");
            entries
        }
        Ok(entries) => {
            info!(path = %path.display(), entries = entries.len(), "snapshot loaded");
            entries
        }
        Err(err) => {
            error!(error = %err, "failed to load snapshot, starting with empty storage");
            KvMap::default()
        }
    }
}

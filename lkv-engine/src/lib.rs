pub mod engine;
pub mod persistence;
pub mod snapshot;
pub mod storage;

pub use engine::KvStore;
pub use persistence::{IniFile, JsonFile, KvMap, Persistence};
pub use snapshot::SnapshotHandle;
pub use storage::{Storage, StorageStats};

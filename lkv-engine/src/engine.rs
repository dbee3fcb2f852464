//! # Store Interface
//!
//! ## Design Principles
//!
//! 1. **Strategy Pattern**: The command parser only needs read/write, so it
//!    talks to this trait instead of the concrete [`Storage`](crate::Storage).
//! 2. **Infallible Surface**: A missing key is an empty string, not an error;
//!    persistence failures are handled inside the store.
//! 3. **Thread-Safe**: Implementations are shared across connection tasks.

/// Read/write contract used by the protocol layer.
pub trait KvStore: Send + Sync {
    /// Returns the value for `key`, or an empty string if absent.
    fn read(&self, key: &str) -> String;

    /// Inserts or replaces `key` with `value`.
    ///
    /// Takes ownership so the map can store the strings without copying.
    fn write(&self, key: String, value: String);
}

// lkv-common - Shared types and protocol definitions for LineKV
//
// This crate defines the error taxonomy, the line protocol vocabulary and the
// stop flags shared by the storage engine, the server and the client.

pub mod error;
pub mod protocol;
pub mod signal;

// Re-export for convenience
pub use error::*;
pub use signal::StopFlag;

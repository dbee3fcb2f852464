//! # LineKV Server
//!
//! Line-based TCP front end for the shared [`Storage`](lkv_engine::Storage).
//!
//! - [`server`] binds the listener, spawns one worker per connection and owns
//!   the shutdown sequence.
//! - [`connection`] frames request lines and writes replies.
//! - [`protocol`] turns a line into a store read or write.
//! - [`registry`] tracks worker handles and reaps finished ones.
//! - [`shutdown`] holds the stop flags and OS signal handling.
//! - [`config`], [`metrics`] and [`report`] cover the operator surface.

pub mod config;
pub mod connection;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod server;
pub mod shutdown;

pub use config::{Cli, ServerConfig};
pub use server::{Server, ShutdownReport};

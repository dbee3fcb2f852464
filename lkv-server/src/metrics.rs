//! # Server Metrics
//!
//! Connection and command counters for the periodic statistics report.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply.
//! 2. **Zero-Cost Access**: Snapshots are plain `Copy` structs.
//!
//! ## Notes
//! - `Ordering::Relaxed` is sufficient: no cross-field ordering is needed,
//!   the values are only ever reported.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the server counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Connections accepted since start.
    pub connections_total: u64,
    /// Connections currently open.
    pub connections_active: u64,
    /// Command lines processed since start.
    pub lines_total: u64,
}

/// Thread-safe counters shared by the listener and every worker.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    lines_total: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly accepted connection.
    pub fn record_connection_open(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection whose worker has exited.
    pub fn record_connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records one framed request line.
    pub fn record_line(&self) {
        self.lines_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            lines_total: self.lines_total.load(Ordering::Relaxed),
        }
    }
}

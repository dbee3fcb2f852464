//! Periodic statistics report on standard output.

use std::sync::Arc;
use std::time::Duration;

use lkv_common::StopFlag;
use lkv_engine::{Storage, StorageStats};

use crate::metrics::{MetricsSnapshot, ServerMetrics};

/// Formats one report line: totals, deltas since the previous report,
/// connections and request lines handled.
pub fn format_report(current: &StorageStats, previous: &StorageStats, server: &MetricsSnapshot) -> String {
    let delta = current.delta_since(previous);
    format!(
        "reads: {} (+{}), writes: {} (+{}), connections: {} open / {} total, lines: {}",
        current.reads,
        delta.reads,
        current.writes,
        delta.writes,
        server.connections_active,
        server.connections_total,
        server.lines_total,
    )
}

/// Prints a report every `interval` until `stop` is set.
pub async fn run_reporter(
    storage: Arc<Storage>,
    metrics: Arc<ServerMetrics>,
    interval: Duration,
    stop: StopFlag,
) {
    let mut previous = storage.stats();
    while !stop.sleep_or_stopped(interval).await {
        let current = storage.stats();
        println!("{}", format_report(&current, &previous, &metrics.snapshot()));
        previous = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_shows_totals_and_deltas() {
        let previous = StorageStats { reads: 90, writes: 7 };
        let current = StorageStats { reads: 120, writes: 7 };
        let server = MetricsSnapshot {
            connections_total: 12,
            connections_active: 3,
            lines_total: 127,
        };

        assert_eq!(
            format_report(&current, &previous, &server),
            "reads: 120 (+30), writes: 7 (+0), connections: 3 open / 12 total, lines: 127"
        );
    }
}

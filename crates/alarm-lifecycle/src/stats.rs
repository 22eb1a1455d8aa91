//! Failure and throughput counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the coordinator. Each increment is mirrored to the
/// `metrics` registry.
#[derive(Debug, Default)]
pub struct LifecycleStats {
    submitted: AtomicU64,
    dropped: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    snapshot_failures: AtomicU64,
    persistence_failures: AtomicU64,
    unbound_closes: AtomicU64,
    orphans_closed: AtomicU64,
    deferred_closes: AtomicU64,
}

/// Point-in-time copy of [`LifecycleStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleStatsSnapshot {
    pub submitted: u64,
    pub dropped: u64,
    pub opened: u64,
    pub closed: u64,
    pub snapshot_failures: u64,
    pub persistence_failures: u64,
    pub unbound_closes: u64,
    pub orphans_closed: u64,
    /// Closes parked in a shard backlog because the queue was full
    pub deferred_closes: u64,
}

macro_rules! counter_fn {
    ($fn_name:ident, $field:ident, $metric:literal) => {
        pub(crate) fn $fn_name(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            metrics::counter!($metric).increment(1);
        }
    };
}

impl LifecycleStats {
    counter_fn!(record_submitted, submitted, "lifecycle_submitted_total");
    counter_fn!(record_dropped, dropped, "lifecycle_dropped_total");
    counter_fn!(record_opened, opened, "alarms_opened_total");
    counter_fn!(record_closed, closed, "alarms_closed_total");
    counter_fn!(record_snapshot_failure, snapshot_failures, "snapshot_failures_total");
    counter_fn!(record_persistence_failure, persistence_failures, "persistence_failures_total");
    counter_fn!(record_unbound_close, unbound_closes, "lifecycle_unbound_closes_total");
    counter_fn!(record_orphan_closed, orphans_closed, "lifecycle_orphans_closed_total");
    counter_fn!(record_deferred_close, deferred_closes, "lifecycle_deferred_closes_total");

    pub fn snapshot(&self) -> LifecycleStatsSnapshot {
        LifecycleStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            unbound_closes: self.unbound_closes.load(Ordering::Relaxed),
            orphans_closed: self.orphans_closed.load(Ordering::Relaxed),
            deferred_closes: self.deferred_closes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = LifecycleStats::default();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.opened, 0);
    }
}

//! Engine event counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Relaxed event counters kept by each engine.
#[derive(Debug, Default)]
pub struct MonitorStats {
    updates: AtomicU64,
    ignored: AtomicU64,
    rejected: AtomicU64,
    deliveries: AtomicU64,
    coalesced: AtomicU64,
    overruns: AtomicU64,
    violations: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Raw updates offered to the engine.
    pub updates: u64,
    /// Updates dropped because the engine was stopped.
    pub ignored: u64,
    /// Updates dropped because their field count did not match the engine.
    pub rejected: u64,
    /// Snapshots published to the consumer.
    pub deliveries: u64,
    /// Updates that found no free buffer and were folded into a later delivery.
    pub coalesced: u64,
    /// Field changes absorbed into an already pending change.
    pub overruns: u64,
    /// Out-of-order or foreign releases.
    pub violations: u64,
}

impl MonitorStats {
    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overruns(&self, count: u64) {
        if count > 0 {
            self.overruns.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            updates: self.updates.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = MonitorStats::default();
        stats.record_update();
        stats.record_update();
        stats.record_delivery();
        stats.record_overruns(3);
        stats.record_overruns(0);
        stats.record_violation();

        let snap = stats.snapshot();
        assert_eq!(snap.updates, 2);
        assert_eq!(snap.deliveries, 1);
        assert_eq!(snap.overruns, 3);
        assert_eq!(snap.violations, 1);
        assert_eq!(snap.ignored, 0);
    }

    #[test]
    fn snapshot_serializes() {
        let snap = StatsSnapshot {
            deliveries: 4,
            ..StatsSnapshot::default()
        };
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["deliveries"], 4);
    }
}

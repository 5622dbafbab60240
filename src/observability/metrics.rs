//! Metrics registry for livestore
//!
//! - Counters only
//! - Monotonic increase
//! - Shared by every file opened in one environment

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Metrics registry containing all operational counters
///
/// # Thread Safety
///
/// All counters use atomic operations with Relaxed ordering.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    commits: AtomicU64,
    write_conflicts: AtomicU64,
    snapshots_pruned: AtomicU64,
    snapshots_evicted: AtomicU64,
    notifiers_registered: AtomicU64,
    notifiers_terminated: AtomicU64,
    initial_deliveries: AtomicU64,
    update_deliveries: AtomicU64,
    error_deliveries: AtomicU64,
    empty_updates_suppressed: AtomicU64,
    deliveries_coalesced: AtomicU64,
    notifier_resets: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Store metrics

    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_write_conflicts(&self) {
        self.write_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_snapshots_pruned(&self, count: u64) {
        self.snapshots_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_snapshots_evicted(&self, count: u64) {
        self.snapshots_evicted.fetch_add(count, Ordering::Relaxed);
    }

    // Notifier metrics

    pub fn increment_notifiers_registered(&self) {
        self.notifiers_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notifiers_terminated(&self) {
        self.notifiers_terminated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_initial_deliveries(&self) {
        self.initial_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_update_deliveries(&self) {
        self.update_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_error_deliveries(&self) {
        self.error_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_empty_updates_suppressed(&self) {
        self.empty_updates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// A scheduled delivery was folded into one already queued
    pub fn increment_deliveries_coalesced(&self) {
        self.deliveries_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// A notifier fell back to an initial delivery after its snapshot was evicted
    pub fn increment_notifier_resets(&self) {
        self.notifier_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            write_conflicts: self.write_conflicts.load(Ordering::Relaxed),
            snapshots_pruned: self.snapshots_pruned.load(Ordering::Relaxed),
            snapshots_evicted: self.snapshots_evicted.load(Ordering::Relaxed),
            notifiers_registered: self.notifiers_registered.load(Ordering::Relaxed),
            notifiers_terminated: self.notifiers_terminated.load(Ordering::Relaxed),
            initial_deliveries: self.initial_deliveries.load(Ordering::Relaxed),
            update_deliveries: self.update_deliveries.load(Ordering::Relaxed),
            error_deliveries: self.error_deliveries.load(Ordering::Relaxed),
            empty_updates_suppressed: self.empty_updates_suppressed.load(Ordering::Relaxed),
            deliveries_coalesced: self.deliveries_coalesced.load(Ordering::Relaxed),
            notifier_resets: self.notifier_resets.load(Ordering::Relaxed),
        }
    }

    /// Get current snapshot of all metrics as JSON
    pub fn to_json(&self) -> String {
        // A struct of integers always serializes.
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub commits: u64,
    pub write_conflicts: u64,
    pub snapshots_pruned: u64,
    pub snapshots_evicted: u64,
    pub notifiers_registered: u64,
    pub notifiers_terminated: u64,
    pub initial_deliveries: u64,
    pub update_deliveries: u64,
    pub error_deliveries: u64,
    pub empty_updates_suppressed: u64,
    pub deliveries_coalesced: u64,
    pub notifier_resets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zeroed() {
        let metrics = MetricsRegistry::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_increment() {
        let metrics = MetricsRegistry::new();
        metrics.increment_commits();
        metrics.increment_commits();
        metrics.add_snapshots_pruned(3);
        metrics.increment_deliveries_coalesced();

        let snap = metrics.snapshot();
        assert_eq!(snap.commits, 2);
        assert_eq!(snap.snapshots_pruned, 3);
        assert_eq!(snap.deliveries_coalesced, 1);
    }

    #[test]
    fn test_to_json() {
        let metrics = MetricsRegistry::new();
        metrics.increment_update_deliveries();

        let json: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(json["update_deliveries"], 1);
        assert_eq!(json["commits"], 0);
    }
}

//! Snapshot retention
//!
//! A historical snapshot is kept only while something needs it:
//! - The latest snapshot is always retained
//! - A snapshot pinned by a reader is never dropped
//! - A snapshot pinned only by notifiers is kept until the history limit
//!   forces it out; the notifier then sees `VersionNotAvailable`
//! - A snapshot with no pins is dropped as soon as a newer one exists
//!
//! This module provides:
//! - `RetentionState` - Lifecycle of one retained version
//! - `RetentionSet` - Pin accounting and pruning

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Snapshot, SnapshotVersion};

/// Retention states of a snapshot version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionState {
    /// Latest published version, untouchable
    Latest,
    /// Pinned by at least one reader, untouchable
    ReaderPinned,
    /// Pinned only by notifiers, evictable under a history limit
    NotifierPinned,
    /// No pins; dropped on the next prune
    Unpinned,
}

#[derive(Debug)]
struct Retained {
    snapshot: Arc<Snapshot>,
    readers: usize,
    notifiers: usize,
}

/// Outcome of a prune pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneResult {
    /// Unpinned versions that were dropped
    pub pruned: Vec<SnapshotVersion>,
    /// Notifier-pinned versions evicted by the history limit
    pub evicted: Vec<SnapshotVersion>,
}

impl PruneResult {
    pub fn is_empty(&self) -> bool {
        self.pruned.is_empty() && self.evicted.is_empty()
    }
}

/// Retained snapshots and their pin counts.
#[derive(Debug)]
pub struct RetentionSet {
    retained: BTreeMap<SnapshotVersion, Retained>,
    latest: Arc<Snapshot>,
}

impl RetentionSet {
    /// Creates a set holding only `initial`.
    pub fn new(initial: Arc<Snapshot>) -> Self {
        let mut retained = BTreeMap::new();
        retained.insert(
            initial.version(),
            Retained {
                snapshot: Arc::clone(&initial),
                readers: 0,
                notifiers: 0,
            },
        );
        Self {
            retained,
            latest: initial,
        }
    }

    pub fn latest_version(&self) -> SnapshotVersion {
        self.latest.version()
    }

    /// The latest snapshot
    pub fn latest(&self) -> Arc<Snapshot> {
        Arc::clone(&self.latest)
    }

    /// Publishes a new latest snapshot, optionally with one reader pin.
    pub fn publish(&mut self, snapshot: Arc<Snapshot>, pinned: bool) {
        debug_assert!(snapshot.version() > self.latest.version());
        self.retained.insert(
            snapshot.version(),
            Retained {
                snapshot: Arc::clone(&snapshot),
                readers: usize::from(pinned),
                notifiers: 0,
            },
        );
        self.latest = snapshot;
    }

    /// Returns the snapshot at `version` if still retained.
    pub fn get(&self, version: SnapshotVersion) -> Option<Arc<Snapshot>> {
        self.retained.get(&version).map(|r| Arc::clone(&r.snapshot))
    }

    pub fn contains(&self, version: SnapshotVersion) -> bool {
        self.retained.contains_key(&version)
    }

    /// Adds a reader pin; returns the snapshot or None if not retained.
    pub fn pin_reader(&mut self, version: SnapshotVersion) -> Option<Arc<Snapshot>> {
        let entry = self.retained.get_mut(&version)?;
        entry.readers += 1;
        Some(Arc::clone(&entry.snapshot))
    }

    /// Drops a reader pin. Unknown versions are ignored.
    pub fn unpin_reader(&mut self, version: SnapshotVersion) {
        if let Some(entry) = self.retained.get_mut(&version) {
            entry.readers = entry.readers.saturating_sub(1);
        }
    }

    /// Adds a notifier pin; returns false if the version is gone.
    pub fn pin_notifier(&mut self, version: SnapshotVersion) -> bool {
        match self.retained.get_mut(&version) {
            Some(entry) => {
                entry.notifiers += 1;
                true
            }
            None => false,
        }
    }

    /// Drops a notifier pin. Evicted versions are ignored.
    pub fn unpin_notifier(&mut self, version: SnapshotVersion) {
        if let Some(entry) = self.retained.get_mut(&version) {
            entry.notifiers = entry.notifiers.saturating_sub(1);
        }
    }

    /// Retention state of a retained version
    pub fn state(&self, version: SnapshotVersion) -> Option<RetentionState> {
        let entry = self.retained.get(&version)?;
        Some(if version == self.latest.version() {
            RetentionState::Latest
        } else if entry.readers > 0 {
            RetentionState::ReaderPinned
        } else if entry.notifiers > 0 {
            RetentionState::NotifierPinned
        } else {
            RetentionState::Unpinned
        })
    }

    /// Drops unpinned versions, then evicts the oldest notifier-pinned
    /// versions while more than `history_limit` versions remain.
    pub fn prune(&mut self, history_limit: Option<usize>) -> PruneResult {
        let mut result = PruneResult::default();

        let unpinned: Vec<SnapshotVersion> = self
            .retained
            .keys()
            .copied()
            .filter(|v| self.state(*v) == Some(RetentionState::Unpinned))
            .collect();
        for version in unpinned {
            self.retained.remove(&version);
            result.pruned.push(version);
        }

        if let Some(limit) = history_limit {
            while self.retained.len() > limit {
                let oldest = self
                    .retained
                    .keys()
                    .copied()
                    .find(|v| self.state(*v) == Some(RetentionState::NotifierPinned));
                match oldest {
                    Some(version) => {
                        self.retained.remove(&version);
                        result.evicted.push(version);
                    }
                    None => break,
                }
            }
        }

        result
    }

    /// Retained versions in ascending order
    pub fn versions(&self) -> Vec<SnapshotVersion> {
        self.retained.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }
}

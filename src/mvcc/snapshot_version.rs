//! SnapshotVersion - Totally ordered snapshot identity
//!
//! - Every published snapshot has exactly one version
//! - Versions strictly increase with each commit
//! - The empty store starts at version 0

use std::fmt;

use serde::{Deserialize, Serialize};

/// A totally ordered snapshot identity.
///
/// Versions define the only ordering the notification layer relies on:
/// a notifier never delivers a version lower than or equal to one it has
/// already delivered.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SnapshotVersion(u64);

impl SnapshotVersion {
    /// Version of the empty store before any commit.
    pub const INITIAL: SnapshotVersion = SnapshotVersion(0);

    /// Creates a new SnapshotVersion with the given value.
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the version a commit on top of this one publishes.
    #[inline]
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

//! ReadTransaction - one reader's view of the store
//!
//! A read transaction pins exactly one snapshot. Advancing it swaps the
//! pin for a newer one; it never moves to an older version.

use std::sync::Arc;

use super::{Snapshot, SnapshotPin, SnapshotVersion, VersionedStore};
use crate::error::Result;

/// A pinned, monotonically advancing view of a store.
#[derive(Debug)]
pub struct ReadTransaction {
    store: VersionedStore,
    pin: SnapshotPin,
}

impl ReadTransaction {
    /// Begins a read transaction at the latest version.
    pub fn begin(store: &VersionedStore) -> Result<Self> {
        let pin = store.pin(None)?;
        Ok(Self {
            store: store.clone(),
            pin,
        })
    }

    /// Begins a read transaction at a historical version.
    ///
    /// # Errors
    ///
    /// `VersionNotAvailable` if the version was pruned.
    pub fn at(store: &VersionedStore, version: SnapshotVersion) -> Result<Self> {
        let pin = store.pin(Some(version))?;
        Ok(Self {
            store: store.clone(),
            pin,
        })
    }

    /// Wraps a pin that is already held, such as the one a commit returns.
    pub(crate) fn from_pin(store: &VersionedStore, pin: SnapshotPin) -> Self {
        Self {
            store: store.clone(),
            pin,
        }
    }

    pub fn version(&self) -> SnapshotVersion {
        self.pin.version()
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        self.pin.snapshot()
    }

    /// Returns true if a newer version has been published.
    pub fn is_stale(&self) -> bool {
        self.store.current_version() > self.version()
    }

    /// Moves to the latest version. Returns true if the version changed.
    pub fn advance(&mut self) -> Result<bool> {
        if !self.is_stale() {
            return Ok(false);
        }
        let pin = self.store.pin(None)?;
        Ok(self.advance_to(pin))
    }

    /// Moves to an already pinned version if it is newer than the current
    /// one. Returns true if the version changed.
    pub fn advance_to(&mut self, pin: SnapshotPin) -> bool {
        if pin.version() <= self.version() {
            return false;
        }
        self.pin = pin;
        true
    }
}

//! MVCC subsystem
//!
//! Readers see immutable snapshots; a single writer per store publishes
//! new snapshots without blocking readers.
//!
//! This module provides:
//! - `SnapshotVersion` - Totally ordered snapshot identity
//! - `Snapshot` - Immutable committed state with copy-on-write tables
//! - `VersionedStore` - Publishing, pinning and retention
//! - `ReadTransaction` - One reader's monotonically advancing view
//! - `WriteTransaction` - Single-writer mutation and commit
//! - `RetentionSet` - Reader and notifier pin accounting

mod read_transaction;
mod retention;
mod snapshot;
mod snapshot_version;
mod store;
mod write;

pub use read_transaction::ReadTransaction;
pub use retention::{PruneResult, RetentionSet, RetentionState};
pub use snapshot::{ObjectData, Snapshot, Table};
pub use snapshot_version::SnapshotVersion;
pub use store::{CommitObserver, NotifierPin, SnapshotPin, VersionedStore};
pub use write::WriteTransaction;

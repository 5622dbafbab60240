//! VersionedStore - snapshot-isolated object store
//!
//! Readers pin immutable snapshots and never block writers. Writers are
//! serialized by a single write lock per store; a commit publishes a new
//! snapshot atomically and then wakes everything waiting for change.
//!
//! Lock order: `writer` before `retention`. Neither lock is held while
//! commit observers run.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::retention::{PruneResult, RetentionSet};
use super::{Snapshot, SnapshotVersion, Table, WriteTransaction};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::schema::Schema;

/// Receives a callback after every commit.
///
/// Observers run on the committing thread after the write lock has been
/// released, so they may start another write. A commit made meanwhile
/// (by the observer itself or another thread) can be reported before the
/// one that released the lock: versions arrive once each, but not
/// necessarily in order.
pub trait CommitObserver: Send + Sync {
    /// Called once per published version.
    fn on_commit(&self, version: SnapshotVersion);
}

pub(crate) struct StoreInner {
    path: String,
    config: StoreConfig,
    schema: Arc<Schema>,
    current: AtomicU64,
    retention: Mutex<RetentionSet>,
    changed: Condvar,
    writer: Mutex<Option<ThreadId>>,
    writer_released: Condvar,
    observers: Mutex<Vec<Weak<dyn CommitObserver>>>,
    metrics: Arc<MetricsRegistry>,
}

impl StoreInner {
    /// Runs a prune pass and records its outcome.
    fn prune(&self, retention: &mut RetentionSet) {
        let result = retention.prune(self.config.history_limit);
        if !result.is_empty() {
            self.record_prune(&result);
        }
    }

    fn record_prune(&self, result: &PruneResult) {
        self.metrics.add_snapshots_pruned(result.pruned.len() as u64);
        self.metrics.add_snapshots_evicted(result.evicted.len() as u64);
        for version in &result.evicted {
            log_event(
                Event::SnapshotEvicted,
                &[("path", &self.path), ("version", &version.to_string())],
            );
        }
        if !result.pruned.is_empty() {
            log_event(
                Event::SnapshotPruned,
                &[
                    ("path", &self.path),
                    ("count", &result.pruned.len().to_string()),
                ],
            );
        }
    }
}

/// A versioned, snapshot-isolated object store for one file.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct VersionedStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedStore")
            .field("path", &self.inner.path)
            .field("version", &self.current_version())
            .finish()
    }
}

impl VersionedStore {
    /// Creates an empty store at version 0.
    pub fn new(
        path: impl Into<String>,
        schema: Schema,
        config: StoreConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let schema = Arc::new(schema);
        let initial = Arc::new(Snapshot::empty(Arc::clone(&schema)));
        Self {
            inner: Arc::new(StoreInner {
                path: path.into(),
                config,
                schema,
                current: AtomicU64::new(initial.version().value()),
                retention: Mutex::new(RetentionSet::new(initial)),
                changed: Condvar::new(),
                writer: Mutex::new(None),
                writer_released: Condvar::new(),
                observers: Mutex::new(Vec::new()),
                metrics,
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    pub fn config(&self) -> StoreConfig {
        self.inner.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.inner.metrics
    }

    /// Latest published version, read without locking.
    pub fn current_version(&self) -> SnapshotVersion {
        SnapshotVersion::new(self.inner.current.load(Ordering::Acquire))
    }

    /// Latest snapshot, unpinned.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.inner.retention.lock().latest()
    }

    /// Pins a snapshot for reading.
    ///
    /// `None` pins the latest version.
    ///
    /// # Errors
    ///
    /// `VersionNotAvailable` if the requested version has been pruned.
    pub fn pin(&self, version: Option<SnapshotVersion>) -> Result<SnapshotPin> {
        let mut retention = self.inner.retention.lock();
        let version = version.unwrap_or_else(|| retention.latest_version());
        let snapshot = retention
            .pin_reader(version)
            .ok_or(Error::VersionNotAvailable(version))?;
        Ok(SnapshotPin {
            store: Arc::clone(&self.inner),
            snapshot,
        })
    }

    /// Pins a version on behalf of a notifier's last delivery.
    ///
    /// # Errors
    ///
    /// `VersionNotAvailable` if the version has been pruned.
    pub fn pin_notifier(&self, version: SnapshotVersion) -> Result<NotifierPin> {
        let mut retention = self.inner.retention.lock();
        if !retention.pin_notifier(version) {
            return Err(Error::VersionNotAvailable(version));
        }
        Ok(NotifierPin {
            store: Arc::clone(&self.inner),
            version,
        })
    }

    /// Looks up a retained snapshot without pinning it.
    pub fn snapshot(&self, version: SnapshotVersion) -> Result<Arc<Snapshot>> {
        self.inner
            .retention
            .lock()
            .get(version)
            .ok_or(Error::VersionNotAvailable(version))
    }

    /// Retained versions in ascending order
    pub fn retained_versions(&self) -> Vec<SnapshotVersion> {
        self.inner.retention.lock().versions()
    }

    /// Begins a write transaction, blocking while another thread writes.
    ///
    /// # Errors
    ///
    /// `WriteConflict` if the calling thread already holds the write lock.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        let me = thread::current().id();
        let mut writer = self.inner.writer.lock();
        if *writer == Some(me) {
            return Err(self.conflict());
        }
        while writer.is_some() {
            self.inner.writer_released.wait(&mut writer);
        }
        *writer = Some(me);
        drop(writer);
        Ok(WriteTransaction::new(self.clone(), self.latest()))
    }

    /// Begins a write transaction without waiting.
    ///
    /// # Errors
    ///
    /// `WriteConflict` if any write transaction is active on this store.
    pub fn try_begin_write(&self) -> Result<WriteTransaction> {
        let mut writer = self.inner.writer.lock();
        if writer.is_some() {
            return Err(self.conflict());
        }
        *writer = Some(thread::current().id());
        drop(writer);
        Ok(WriteTransaction::new(self.clone(), self.latest()))
    }

    fn conflict(&self) -> Error {
        self.inner.metrics.increment_write_conflicts();
        log_event(Event::WriteConflict, &[("path", &self.inner.path)]);
        Error::WriteConflict {
            path: self.inner.path.clone(),
        }
    }

    /// Returns true if some thread holds the write lock.
    pub fn is_write_locked(&self) -> bool {
        self.inner.writer.lock().is_some()
    }

    /// Publishes the tables of a finished write transaction and returns a
    /// reader pin on the new snapshot.
    ///
    /// The caller holds the write lock; it is released here, before
    /// observers run.
    pub(crate) fn publish(&self, base: SnapshotVersion, tables: Vec<Arc<Table>>) -> SnapshotPin {
        let version = base.next();
        let snapshot = Arc::new(Snapshot::new(
            version,
            Arc::clone(&self.inner.schema),
            tables,
        ));

        {
            let mut retention = self.inner.retention.lock();
            retention.publish(Arc::clone(&snapshot), true);
            self.inner.prune(&mut retention);
            self.inner.current.store(version.value(), Ordering::Release);
            self.inner.changed.notify_all();
        }
        let pin = SnapshotPin {
            store: Arc::clone(&self.inner),
            snapshot,
        };

        self.release_writer();
        self.inner.metrics.increment_commits();
        log_event(
            Event::CommitPublished,
            &[("path", &self.inner.path), ("version", &version.to_string())],
        );
        self.notify_observers(version);
        pin
    }

    pub(crate) fn release_writer(&self) {
        let mut writer = self.inner.writer.lock();
        *writer = None;
        self.inner.writer_released.notify_one();
    }

    fn notify_observers(&self, version: SnapshotVersion) {
        let observers: Vec<Arc<dyn CommitObserver>> = {
            let mut observers = self.inner.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.on_commit(version);
        }
    }

    /// Registers a commit observer. The store holds it weakly.
    pub fn add_commit_observer(&self, observer: Weak<dyn CommitObserver>) {
        self.inner.observers.lock().push(observer);
    }

    /// Blocks until a version newer than `since` is published or the
    /// timeout elapses. Returns true if a newer version exists.
    pub fn wait_for_change(&self, since: SnapshotVersion, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut retention = self.inner.retention.lock();
        while retention.latest_version() <= since {
            if self
                .inner
                .changed
                .wait_until(&mut retention, deadline)
                .timed_out()
            {
                return retention.latest_version() > since;
            }
        }
        true
    }
}

/// A reader pin on one snapshot. Dropping it releases the pin.
pub struct SnapshotPin {
    store: Arc<StoreInner>,
    snapshot: Arc<Snapshot>,
}

impl SnapshotPin {
    pub fn version(&self) -> SnapshotVersion {
        self.snapshot.version()
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }
}

impl fmt::Debug for SnapshotPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SnapshotPin").field(&self.version()).finish()
    }
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        let mut retention = self.store.retention.lock();
        retention.unpin_reader(self.snapshot.version());
        self.store.prune(&mut retention);
    }
}

/// A notifier's pin on its last-delivered version.
///
/// Unlike a reader pin it does not hold the snapshot alive: a store with a
/// history limit may evict the version, after which `snapshot()` fails.
pub struct NotifierPin {
    store: Arc<StoreInner>,
    version: SnapshotVersion,
}

impl NotifierPin {
    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// Resolves the pinned snapshot.
    ///
    /// # Errors
    ///
    /// `VersionNotAvailable` if the version was evicted.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.store
            .retention
            .lock()
            .get(self.version)
            .ok_or(Error::VersionNotAvailable(self.version))
    }
}

impl fmt::Debug for NotifierPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NotifierPin").field(&self.version).finish()
    }
}

impl Drop for NotifierPin {
    fn drop(&mut self) {
        let mut retention = self.store.retention.lock();
        retention.unpin_notifier(self.version);
        self.store.prune(&mut retention);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, Property, Value};
    use std::sync::atomic::AtomicUsize;

    fn store(config: StoreConfig) -> VersionedStore {
        let schema = Schema::new(vec![ObjectSchema::new(
            "Item",
            vec![Property::int("n")],
        )])
        .unwrap();
        VersionedStore::new("test.realm", schema, config, Arc::new(MetricsRegistry::new()))
    }

    fn commit_item(store: &VersionedStore, n: i64) -> SnapshotVersion {
        let mut tx = store.begin_write().unwrap();
        tx.create_object("Item", [("n", Value::Int(n))]).unwrap();
        tx.commit()
    }

    #[test]
    fn test_empty_store_is_version_zero() {
        let store = store(StoreConfig::default());
        assert_eq!(store.current_version(), SnapshotVersion::INITIAL);
        assert_eq!(store.retained_versions(), vec![SnapshotVersion::INITIAL]);
    }

    #[test]
    fn test_commit_increments_version() {
        let store = store(StoreConfig::default());
        assert_eq!(commit_item(&store, 1), SnapshotVersion::new(1));
        assert_eq!(commit_item(&store, 2), SnapshotVersion::new(2));
        assert_eq!(store.current_version(), SnapshotVersion::new(2));
        assert_eq!(store.metrics().snapshot().commits, 2);
    }

    #[test]
    fn test_pinned_snapshot_is_isolated() {
        let store = store(StoreConfig::default());
        commit_item(&store, 1);
        let pin = store.pin(None).unwrap();
        commit_item(&store, 2);

        let table = store.schema().table_id("Item").unwrap();
        assert_eq!(pin.snapshot().table(table).len(), 1);
        assert_eq!(store.latest().table(table).len(), 2);
    }

    #[test]
    fn test_unpinned_versions_are_pruned() {
        let store = store(StoreConfig::default());
        let pin = store.pin(None).unwrap();
        commit_item(&store, 1);
        commit_item(&store, 2);
        assert_eq!(
            store.retained_versions(),
            vec![SnapshotVersion::new(0), SnapshotVersion::new(2)]
        );

        drop(pin);
        assert_eq!(store.retained_versions(), vec![SnapshotVersion::new(2)]);
        assert!(matches!(
            store.pin(Some(SnapshotVersion::new(0))),
            Err(Error::VersionNotAvailable(_))
        ));
    }

    #[test]
    fn test_history_limit_evicts_notifier_pins() {
        let store = store(StoreConfig::bounded(2));
        commit_item(&store, 1);
        let pin = store.pin_notifier(SnapshotVersion::new(1)).unwrap();
        assert!(pin.snapshot().is_ok());

        commit_item(&store, 2);
        let reader = store.pin(None).unwrap();
        assert!(pin.snapshot().is_ok());

        commit_item(&store, 3);
        assert_eq!(
            pin.snapshot().unwrap_err(),
            Error::VersionNotAvailable(SnapshotVersion::new(1))
        );
        assert_eq!(reader.version(), SnapshotVersion::new(2));
        assert_eq!(
            store.retained_versions(),
            vec![SnapshotVersion::new(2), SnapshotVersion::new(3)]
        );
        assert_eq!(store.metrics().snapshot().snapshots_evicted, 1);
    }

    #[test]
    fn test_try_begin_write_conflicts() {
        let store = store(StoreConfig::default());
        let tx = store.begin_write().unwrap();

        let other = store.clone();
        let result = thread::spawn(move || other.try_begin_write().map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(Error::WriteConflict { .. })));

        tx.cancel();
        assert!(store.try_begin_write().is_ok());
    }

    #[test]
    fn test_reentrant_begin_write_conflicts_instead_of_deadlocking() {
        let store = store(StoreConfig::default());
        let _tx = store.begin_write().unwrap();
        assert_eq!(
            store.begin_write().err().unwrap().code(),
            "LIVE_WRITE_CONFLICT"
        );
    }

    #[test]
    fn test_begin_write_waits_for_other_writer() {
        let store = store(StoreConfig::default());
        let tx = store.begin_write().unwrap();

        let other = store.clone();
        let handle = thread::spawn(move || commit_item(&other, 2));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(tx.commit(), SnapshotVersion::new(1));
        assert_eq!(handle.join().unwrap(), SnapshotVersion::new(2));
    }

    #[test]
    fn test_wait_for_change() {
        let store = store(StoreConfig::default());
        assert!(!store.wait_for_change(SnapshotVersion::INITIAL, Duration::from_millis(10)));

        let other = store.clone();
        let handle = thread::spawn(move || commit_item(&other, 1));
        assert!(store.wait_for_change(SnapshotVersion::INITIAL, Duration::from_secs(5)));
        handle.join().unwrap();
    }

    struct Counter(AtomicUsize);

    impl CommitObserver for Counter {
        fn on_commit(&self, _version: SnapshotVersion) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_commit_observers_are_weak() {
        let store = store(StoreConfig::default());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let weak: Weak<Counter> = Arc::downgrade(&counter);
        store.add_commit_observer(weak);

        commit_item(&store, 1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        drop(counter);
        commit_item(&store, 2);
    }

    struct NestedWriter {
        store: VersionedStore,
        seen: Mutex<Vec<SnapshotVersion>>,
    }

    impl CommitObserver for NestedWriter {
        fn on_commit(&self, version: SnapshotVersion) {
            if version == SnapshotVersion::new(1) {
                commit_item(&self.store, 2);
            }
            self.seen.lock().push(version);
        }
    }

    #[test]
    fn test_observer_may_commit_from_callback() {
        let store = store(StoreConfig::default());
        let observer = Arc::new(NestedWriter {
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let weak: Weak<NestedWriter> = Arc::downgrade(&observer);
        store.add_commit_observer(weak);

        commit_item(&store, 1);
        assert_eq!(store.current_version(), SnapshotVersion::new(2));
        assert_eq!(
            *observer.seen.lock(),
            vec![SnapshotVersion::new(2), SnapshotVersion::new(1)]
        );
    }
}

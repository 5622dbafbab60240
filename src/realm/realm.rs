//! Realm - a thread-bound handle on one open file
//!
//! A realm owns one read transaction and delivers the notifications of the
//! collections observed through it. Deliveries are scheduled by the file's
//! coordinator and run as tasks on the realm's run loop; several commits
//! landing before the run loop gets to the task are delivered as one pass.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use super::environment::SharedFile;
use super::Results;
use crate::changes::{CollectionChange, KeyPaths, ObjectChange};
use crate::collection::{CollectionSource, CollectionSpec, ObjectRef};
use crate::config::RealmConfig;
use crate::error::{Error, Result, UsageError};
use crate::mvcc::{ReadTransaction, Snapshot, SnapshotPin, SnapshotVersion, WriteTransaction};
use crate::notify::{
    Callback, CallbackSlot, CollectionNotifier, DeliveryTarget, ExecutorHandle, NotificationToken,
    Notifier, ObjectNotifier, TargetId,
};
use crate::observability::{log_event, Event};
use crate::schema::{ObjKey, Schema};

/// Realm-level notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealmEvent {
    /// The realm advanced to a newer version
    DidChange,
    /// Auto-refresh is off and a newer version is available
    RefreshRequired,
}

#[derive(Default)]
struct DeliveryPass {
    active: bool,
    again: bool,
}

struct Announced {
    did_change: SnapshotVersion,
    refresh_required: SnapshotVersion,
}

pub(crate) struct RealmShared {
    this: Weak<RealmShared>,
    owner: ThreadId,
    config: RealmConfig,
    file: Arc<SharedFile>,
    executor: ExecutorHandle,
    target: TargetId,
    read: Mutex<Option<ReadTransaction>>,
    auto_refresh: AtomicBool,
    closed: AtomicBool,
    in_write: AtomicBool,
    refresh_scheduled: AtomicBool,
    delivery: Mutex<DeliveryPass>,
    announced: Mutex<Announced>,
    listeners: Mutex<BTreeMap<u64, Arc<CallbackSlot<RealmEvent>>>>,
    next_listener: AtomicU64,
}

impl RealmShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the realm from any thread.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.read.lock().take();
        self.file.coordinator().remove_target(self.target);
        let listeners: Vec<Arc<CallbackSlot<RealmEvent>>> =
            std::mem::take(&mut *self.listeners.lock()).into_values().collect();
        for listener in listeners {
            listener.stop();
        }
        log_event(Event::RealmClose, &[("path", &self.config.path)]);
    }

    fn read_version(&self) -> Option<SnapshotVersion> {
        self.read.lock().as_ref().map(ReadTransaction::version)
    }

    fn current_snapshot(&self) -> Result<Arc<Snapshot>> {
        let mut read = self.read.lock();
        if read.is_none() {
            *read = Some(ReadTransaction::begin(self.file.store())?);
        }
        match read.as_ref() {
            Some(txn) => Ok(Arc::clone(txn.snapshot())),
            None => Err(UsageError::RealmClosed.into()),
        }
    }

    fn advance_read(&self) -> Result<bool> {
        let mut read = self.read.lock();
        match read.as_mut() {
            Some(txn) => txn.advance(),
            None => {
                *read = Some(ReadTransaction::begin(self.file.store())?);
                Ok(true)
            }
        }
    }

    fn adopt(&self, pin: SnapshotPin) {
        let mut read = self.read.lock();
        match read.as_mut() {
            Some(txn) => {
                txn.advance_to(pin);
            }
            None => *read = Some(ReadTransaction::from_pin(self.file.store(), pin)),
        }
    }

    /// Task body run on the realm's executor.
    fn run_scheduled(&self) {
        self.refresh_scheduled.store(false, Ordering::Release);
        if self.is_closed() {
            return;
        }
        if self.auto_refresh.load(Ordering::Acquire) {
            if let Err(error) = self.advance_read() {
                tracing::warn!(path = %self.config.path, %error, "auto-refresh failed");
            }
        }
        self.deliver_notifiers();
        self.announce();
    }

    /// Delivers every notifier at the realm's read version, in
    /// registration order. A nested call (from inside a callback) is
    /// folded into another pass of the outer one.
    fn deliver_notifiers(&self) {
        {
            let mut pass = self.delivery.lock();
            if pass.active {
                pass.again = true;
                return;
            }
            pass.active = true;
        }
        loop {
            let pin = self
                .read_version()
                .and_then(|version| self.file.store().pin(Some(version)).ok());
            if let Some(pin) = pin {
                for notifier in self.file.coordinator().notifiers_for(self.target) {
                    notifier.deliver(self.file.store(), pin.snapshot());
                }
            }
            let mut pass = self.delivery.lock();
            if !pass.again {
                pass.active = false;
                break;
            }
            pass.again = false;
        }
    }

    fn announce(&self) {
        let Some(version) = self.read_version() else {
            return;
        };
        let latest = self.file.store().current_version();
        let mut events = Vec::new();
        {
            let mut announced = self.announced.lock();
            if version > announced.did_change {
                announced.did_change = version;
                events.push(RealmEvent::DidChange);
            }
            if !self.auto_refresh.load(Ordering::Acquire)
                && latest > version
                && latest > announced.refresh_required
            {
                announced.refresh_required = latest;
                events.push(RealmEvent::RefreshRequired);
            }
        }
        for event in events {
            self.send(event);
        }
    }

    fn send(&self, event: RealmEvent) {
        let listeners: Vec<Arc<CallbackSlot<RealmEvent>>> =
            self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener.invoke(event);
        }
    }
}

impl DeliveryTarget for RealmShared {
    fn schedule_delivery(&self) {
        if self.is_closed() {
            return;
        }
        if self.refresh_scheduled.swap(true, Ordering::AcqRel) {
            self.file.metrics().increment_deliveries_coalesced();
            log_event(Event::DeliveryCoalesced, &[("path", &self.config.path)]);
            return;
        }
        let this = self.this.clone();
        let spawned = self.executor.spawn(move || {
            if let Some(shared) = this.upgrade() {
                shared.run_scheduled();
            }
        });
        if !spawned {
            self.refresh_scheduled.store(false, Ordering::Release);
        }
    }
}

impl Drop for RealmShared {
    fn drop(&mut self) {
        self.close();
    }
}

/// A handle on an open file, bound to the thread that opened it.
///
/// Cheap to clone. Every method fails with `UsageError::IncorrectThread`
/// when called from another thread.
#[derive(Clone)]
pub struct Realm {
    shared: Arc<RealmShared>,
}

impl Realm {
    pub(crate) fn open(file: Arc<SharedFile>, config: RealmConfig, executor: ExecutorHandle) -> Result<Self> {
        let read = ReadTransaction::begin(file.store())?;
        let version = read.version();
        let shared = Arc::new_cyclic(|this: &Weak<RealmShared>| {
            let target: Weak<RealmShared> = this.clone();
            let target = file.coordinator().add_target(target);
            RealmShared {
                this: this.clone(),
                owner: thread::current().id(),
                config,
                file,
                executor,
                target,
                read: Mutex::new(Some(read)),
                auto_refresh: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                in_write: AtomicBool::new(false),
                refresh_scheduled: AtomicBool::new(false),
                delivery: Mutex::new(DeliveryPass::default()),
                announced: Mutex::new(Announced {
                    did_change: version,
                    refresh_required: version,
                }),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(1),
            }
        });
        Ok(Self { shared })
    }

    pub(crate) fn from_shared(shared: Arc<RealmShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<RealmShared> {
        Arc::downgrade(&self.shared)
    }

    fn check_thread(&self) -> Result<()> {
        if thread::current().id() != self.shared.owner {
            return Err(UsageError::IncorrectThread.into());
        }
        Ok(())
    }

    pub(crate) fn check(&self) -> Result<()> {
        self.check_thread()?;
        if self.shared.is_closed() {
            return Err(UsageError::RealmClosed.into());
        }
        Ok(())
    }

    pub fn config(&self) -> &RealmConfig {
        &self.shared.config
    }

    pub fn path(&self) -> &str {
        &self.shared.config.path
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.shared.file.store().schema()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Version of the realm's read transaction
    pub fn version(&self) -> Result<SnapshotVersion> {
        Ok(self.read_snapshot()?.version())
    }

    pub(crate) fn read_snapshot(&self) -> Result<Arc<Snapshot>> {
        self.check()?;
        self.shared.current_snapshot()
    }

    pub fn auto_refresh(&self) -> Result<bool> {
        self.check()?;
        Ok(self.shared.auto_refresh.load(Ordering::Acquire))
    }

    pub fn set_auto_refresh(&self, enabled: bool) -> Result<()> {
        self.check()?;
        self.shared.auto_refresh.store(enabled, Ordering::Release);
        Ok(())
    }

    /// Advances to the latest version and delivers notifications
    /// synchronously. Returns true if the version changed.
    pub fn refresh(&self) -> Result<bool> {
        self.check()?;
        let advanced = self.shared.advance_read()?;
        self.shared.deliver_notifiers();
        self.shared.announce();
        Ok(advanced)
    }

    /// Releases the read transaction and terminates every collection
    /// notifier registered through this realm. The next read begins a new
    /// read transaction.
    pub fn invalidate(&self) -> Result<()> {
        self.check()?;
        self.shared.read.lock().take();
        self.shared
            .file
            .coordinator()
            .terminate_target(self.shared.target);
        Ok(())
    }

    /// Closes the realm. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.check_thread()?;
        self.shared.close();
        Ok(())
    }

    /// Blocks until a version newer than the realm's is published or the
    /// timeout elapses. Does not refresh.
    pub fn wait_for_change(&self, timeout: Duration) -> Result<bool> {
        let version = self.version()?;
        Ok(self.shared.file.store().wait_for_change(version, timeout))
    }

    pub fn is_in_write_transaction(&self) -> bool {
        self.shared.in_write.load(Ordering::Acquire)
    }

    /// Begins a write transaction on the latest version.
    ///
    /// Blocks while another thread writes to the same file.
    pub fn begin_write(&self) -> Result<RealmTransaction> {
        self.check()?;
        if self.shared.config.read_only {
            return Err(UsageError::ReadOnly.into());
        }
        let guard = WriteGuard::acquire(&self.shared)?;
        let tx = self.shared.file.store().begin_write()?;
        self.shared.advance_read()?;
        Ok(RealmTransaction {
            realm: self.clone(),
            tx,
            _guard: guard,
        })
    }

    /// Runs `body` in a write transaction, committing on `Ok` and
    /// cancelling on `Err`.
    pub fn write<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut RealmTransaction) -> Result<T>,
    {
        let mut tx = self.begin_write()?;
        let value = body(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Every object of `object_type`
    pub fn objects(&self, object_type: &str) -> Result<Results> {
        self.check()?;
        let spec = CollectionSpec::table(self.schema(), object_type)?;
        Ok(Results::new(self.clone(), spec))
    }

    /// A list property of one object
    pub fn list(&self, object_type: &str, object: ObjKey, property: &str) -> Result<Results> {
        self.collection(object_type, object, property, "list", |s| {
            matches!(s, CollectionSource::List { .. })
        })
    }

    /// A set property of one object
    pub fn set(&self, object_type: &str, object: ObjKey, property: &str) -> Result<Results> {
        self.collection(object_type, object, property, "set", |s| {
            matches!(s, CollectionSource::Set { .. })
        })
    }

    /// A dictionary property of one object, in entry-key order
    pub fn dictionary(&self, object_type: &str, object: ObjKey, property: &str) -> Result<Results> {
        self.collection(object_type, object, property, "dictionary", |s| {
            matches!(s, CollectionSource::Dictionary { .. })
        })
    }

    /// A linking-objects property of one object
    pub fn linking_objects(&self, object_type: &str, object: ObjKey, property: &str) -> Result<Results> {
        self.collection(object_type, object, property, "linking_objects", |s| {
            matches!(s, CollectionSource::LinkingObjects { .. })
        })
    }

    fn collection(
        &self,
        object_type: &str,
        object: ObjKey,
        property: &str,
        kind: &str,
        expected: fn(&CollectionSource) -> bool,
    ) -> Result<Results> {
        self.check()?;
        let spec = CollectionSpec::property(self.schema(), object_type, object, property)?;
        if !expected(spec.source()) {
            return Err(Error::schema(format!(
                "Property '{}.{}' is not a {}",
                object_type, property, kind
            )));
        }
        Ok(Results::new(self.clone(), spec))
    }

    /// One object at the realm's read version
    pub fn object(&self, object_type: &str, key: ObjKey) -> Result<ObjectRef> {
        let snapshot = self.read_snapshot()?;
        let table = snapshot.schema().require_table(object_type)?;
        if snapshot.object(table, key).is_none() {
            return Err(Error::ObjectNotFound {
                object_type: object_type.to_string(),
                key,
            });
        }
        Ok(ObjectRef::new(snapshot, table, key))
    }

    /// Observes realm-level events.
    pub fn observe<F>(&self, callback: F) -> Result<NotificationToken>
    where
        F: FnMut(RealmEvent) + Send + 'static,
    {
        self.check()?;
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(CallbackSlot::new(Box::new(callback) as Callback<RealmEvent>));
        self.shared.listeners.lock().insert(id, Arc::clone(&slot));

        let realm = self.downgrade();
        Ok(NotificationToken::new(format!("realm-listener-{}", id), move || {
            slot.stop();
            if let Some(shared) = realm.upgrade() {
                shared.listeners.lock().remove(&id);
            }
        }))
    }

    /// Observes one object.
    ///
    /// There is no initial delivery. Each later version in which a
    /// property of the object changed, directly or through a linked
    /// object, delivers `ObjectChange::Change`. Deletion delivers
    /// `ObjectChange::Deleted` once and ends the observation.
    ///
    /// # Errors
    ///
    /// `ObjectNotFound` if the object does not exist at the realm's read
    /// version.
    pub fn observe_object<F>(&self, object_type: &str, key: ObjKey, callback: F) -> Result<NotificationToken>
    where
        F: FnMut(ObjectChange) + Send + 'static,
    {
        self.add_object_notifier(object_type, key, &[] as &[&str], Box::new(callback))
    }

    /// Like `observe_object`, reporting only properties on `key_paths`.
    ///
    /// A key path names a property of the object, or follows links with
    /// dots (`dog.name`). A change further down a path is reported under
    /// its first property, without old or new values.
    ///
    /// # Errors
    ///
    /// `Schema` if a key path does not resolve; `ObjectNotFound` as for
    /// `observe_object`.
    pub fn observe_object_key_paths<S, F>(
        &self,
        object_type: &str,
        key: ObjKey,
        key_paths: &[S],
        callback: F,
    ) -> Result<NotificationToken>
    where
        S: AsRef<str>,
        F: FnMut(ObjectChange) + Send + 'static,
    {
        self.add_object_notifier(object_type, key, key_paths, Box::new(callback))
    }

    fn add_object_notifier<S: AsRef<str>>(
        &self,
        object_type: &str,
        key: ObjKey,
        key_paths: &[S],
        callback: Callback<ObjectChange>,
    ) -> Result<NotificationToken> {
        let object = self.object(object_type, key)?;
        let table = self.schema().require_table(object_type)?;
        let store = self.shared.file.store();
        let coordinator = self.shared.file.coordinator();
        let mut notifier = ObjectNotifier::new(
            coordinator.next_notifier_id(),
            table,
            key,
            store.pin_notifier(object.version())?,
            callback,
            Arc::clone(self.shared.file.metrics()),
        );
        if !key_paths.is_empty() {
            notifier = notifier.with_key_paths(KeyPaths::resolve(self.schema(), table, key_paths)?);
        }
        Ok(self.register_notifier(Arc::new(notifier)))
    }

    /// Registers a collection notifier delivered on this realm's run loop.
    pub(crate) fn add_notifier(
        &self,
        spec: CollectionSpec,
        key_paths: Option<KeyPaths>,
        callback: Callback<CollectionChange>,
    ) -> Result<NotificationToken> {
        self.check()?;
        let coordinator = self.shared.file.coordinator();
        let mut notifier = CollectionNotifier::new(
            coordinator.next_notifier_id(),
            spec,
            callback,
            Arc::clone(self.shared.file.metrics()),
        );
        if let Some(key_paths) = key_paths {
            notifier = notifier.with_key_paths(key_paths);
        }
        Ok(self.register_notifier(Arc::new(notifier)))
    }

    fn register_notifier(&self, notifier: Arc<dyn Notifier>) -> NotificationToken {
        let coordinator = self.shared.file.coordinator();
        let id = notifier.id();
        coordinator.register(Arc::clone(&notifier), self.shared.target);

        let coordinator = Arc::downgrade(coordinator);
        NotificationToken::new(id.to_string(), move || {
            notifier.stop_callback();
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.unregister(id);
            }
        })
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("path", &self.shared.config.path)
            .field("version", &self.shared.read_version())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

/// Clears the realm's in-write flag when dropped.
struct WriteGuard {
    shared: Arc<RealmShared>,
}

impl WriteGuard {
    fn acquire(shared: &Arc<RealmShared>) -> Result<Self> {
        if shared.in_write.swap(true, Ordering::AcqRel) {
            return Err(UsageError::AlreadyInWriteTransaction.into());
        }
        Ok(Self {
            shared: Arc::clone(shared),
        })
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.shared.in_write.store(false, Ordering::Release);
    }
}

/// A write transaction opened through a realm.
///
/// Dereferences to the underlying `WriteTransaction`. Dropping it without
/// committing cancels the write.
pub struct RealmTransaction {
    realm: Realm,
    tx: WriteTransaction,
    _guard: WriteGuard,
}

impl RealmTransaction {
    /// Commits and moves the realm's read transaction to the new version.
    /// Notifications are delivered on the realm's run loop.
    pub fn commit(self) -> Result<SnapshotVersion> {
        self.realm.check_thread()?;
        let RealmTransaction { realm, tx, _guard } = self;
        let pin = tx.commit_and_pin();
        let version = pin.version();
        realm.shared.adopt(pin);
        Ok(version)
    }

    /// Discards every change made in the transaction.
    pub fn cancel(self) {
        let RealmTransaction { tx, .. } = self;
        tx.cancel();
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }
}

impl Deref for RealmTransaction {
    type Target = WriteTransaction;

    fn deref(&self) -> &WriteTransaction {
        &self.tx
    }
}

impl DerefMut for RealmTransaction {
    fn deref_mut(&mut self) -> &mut WriteTransaction {
        &mut self.tx
    }
}

impl fmt::Debug for RealmTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealmTransaction")
            .field("path", &self.realm.shared.config.path)
            .field("base", &self.tx.base_version())
            .finish()
    }
}

//! CollectionNotifier - one live subscription
//!
//! State machine:
//!
//! ```text
//! Unattached --attach--> AwaitingInitial --Initial--> Tracking --Update--> Tracking
//!      \                       |                         |
//!       +-------------------- terminate / Error ---------+--> Terminated
//! ```
//!
//! A tracking notifier pins the version it last delivered. If the store
//! evicts that version the notifier resets and delivers a fresh Initial.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::callback::{Callback, CallbackSlot};
use crate::changes::{ChangeComputer, CollectionChange, KeyPaths};
use crate::collection::{materialize, CollectionSpec, FrozenCollection};
use crate::error::{Error, Result};
use crate::mvcc::{NotifierPin, Snapshot, SnapshotVersion, VersionedStore};
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::schema::ObjKey;

/// Identity of a notifier, unique per coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotifierId(u64);

impl NotifierId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NotifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notifier-{}", self.0)
    }
}

/// Observable phase of a notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierPhase {
    Unattached,
    AwaitingInitial,
    Tracking,
    Terminated,
}

/// A registration driven by the coordinator.
pub(crate) trait Notifier: Send + Sync {
    fn id(&self) -> NotifierId;

    /// Arms the notifier once it is registered.
    fn attach(&self);

    /// Stops the callback without waiting for a delivery in progress.
    fn stop_callback(&self);

    /// Moves to a terminal state, releasing any version pin. Returns true
    /// if the notifier was live.
    fn terminate(&self) -> bool;

    /// Brings the notifier up to `target` and invokes the callback if
    /// there is something to deliver. Returns true if the callback ran.
    fn deliver(&self, store: &VersionedStore, target: &Arc<Snapshot>) -> bool;
}

enum State {
    Unattached,
    AwaitingInitial,
    Tracking { pin: NotifierPin },
    Terminated,
}

impl State {
    fn phase(&self) -> NotifierPhase {
        match self {
            State::Unattached => NotifierPhase::Unattached,
            State::AwaitingInitial => NotifierPhase::AwaitingInitial,
            State::Tracking { .. } => NotifierPhase::Tracking,
            State::Terminated => NotifierPhase::Terminated,
        }
    }
}

/// Per-registration state and callback.
pub struct CollectionNotifier {
    id: NotifierId,
    spec: CollectionSpec,
    key_paths: Option<KeyPaths>,
    state: Mutex<State>,
    callback: CallbackSlot<CollectionChange>,
    metrics: Arc<MetricsRegistry>,
}

impl CollectionNotifier {
    pub fn new(
        id: NotifierId,
        spec: CollectionSpec,
        callback: Callback<CollectionChange>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            id,
            spec,
            key_paths: None,
            state: Mutex::new(State::Unattached),
            callback: CallbackSlot::new(callback),
            metrics,
        }
    }

    /// Limits modification checks to `key_paths`, resolved against the
    /// collection's object type.
    pub fn with_key_paths(mut self, key_paths: KeyPaths) -> Self {
        self.key_paths = Some(key_paths);
        self
    }

    pub fn id(&self) -> NotifierId {
        self.id
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn key_paths(&self) -> Option<&KeyPaths> {
        self.key_paths.as_ref()
    }

    pub fn phase(&self) -> NotifierPhase {
        self.state.lock().phase()
    }

    /// Version of the last delivery, if any
    pub fn last_delivered(&self) -> Option<SnapshotVersion> {
        match &*self.state.lock() {
            State::Tracking { pin } => Some(pin.version()),
            _ => None,
        }
    }

    /// Brings the notifier up to `target` and invokes the callback if
    /// there is something to deliver. Returns true if the callback ran.
    pub fn deliver(&self, store: &VersionedStore, target: &Arc<Snapshot>) -> bool {
        if self.callback.is_stopped() {
            return false;
        }

        let change = {
            let mut state = self.state.lock();
            match self.advance(&state, store, target) {
                Ok(Step::Skip) => return false,
                Ok(Step::Suppress(pin)) => {
                    *state = State::Tracking { pin };
                    self.metrics.increment_empty_updates_suppressed();
                    return false;
                }
                Ok(Step::Deliver(pin, change)) => {
                    *state = State::Tracking { pin };
                    change
                }
                Err(error) => {
                    *state = State::Terminated;
                    log_event(
                        Event::NotifierFailed,
                        &[("notifier", &self.id.to_string()), ("error", &error.to_string())],
                    );
                    CollectionChange::Error(error)
                }
            }
        };

        let counter: fn(&MetricsRegistry) = match &change {
            CollectionChange::Initial(_) => MetricsRegistry::increment_initial_deliveries,
            CollectionChange::Update { .. } => MetricsRegistry::increment_update_deliveries,
            CollectionChange::Error(_) => MetricsRegistry::increment_error_deliveries,
        };
        let delivered = self.callback.invoke(change);
        if delivered {
            counter(&self.metrics);
        }
        delivered
    }

    fn advance(&self, state: &State, store: &VersionedStore, target: &Arc<Snapshot>) -> Result<Step> {
        match state {
            State::Unattached | State::Terminated => Ok(Step::Skip),
            State::AwaitingInitial => self.initial(store, target),
            State::Tracking { pin } => {
                if target.version() <= pin.version() {
                    return Ok(Step::Skip);
                }
                let previous = match pin.snapshot() {
                    Ok(previous) => previous,
                    Err(Error::VersionNotAvailable(version)) => {
                        self.metrics.increment_notifier_resets();
                        log_event(
                            Event::NotifierReset,
                            &[
                                ("notifier", &self.id.to_string()),
                                ("version", &version.to_string()),
                            ],
                        );
                        return self.initial(store, target);
                    }
                    Err(error) => return Err(error),
                };
                let (rows, changes) = ChangeComputer::evaluate_key_paths(
                    &self.spec,
                    &previous,
                    target,
                    self.key_paths.as_ref(),
                )?;
                let pin = store.pin_notifier(target.version())?;
                if changes.is_empty() {
                    return Ok(Step::Suppress(pin));
                }
                let collection = self.freeze(target, rows);
                Ok(Step::Deliver(pin, CollectionChange::Update { collection, changes }))
            }
        }
    }

    fn initial(&self, store: &VersionedStore, target: &Arc<Snapshot>) -> Result<Step> {
        let rows = materialize(&self.spec, target)?;
        let pin = store.pin_notifier(target.version())?;
        Ok(Step::Deliver(pin, CollectionChange::Initial(self.freeze(target, rows))))
    }

    fn freeze(&self, target: &Arc<Snapshot>, rows: Vec<ObjKey>) -> FrozenCollection {
        FrozenCollection::new(Arc::clone(target), self.spec.table_id(), rows)
    }
}

enum Step {
    Skip,
    Suppress(NotifierPin),
    Deliver(NotifierPin, CollectionChange),
}

impl Notifier for CollectionNotifier {
    fn id(&self) -> NotifierId {
        self.id
    }

    fn attach(&self) {
        let mut state = self.state.lock();
        if matches!(*state, State::Unattached) {
            *state = State::AwaitingInitial;
        }
    }

    fn stop_callback(&self) {
        self.callback.stop();
    }

    fn terminate(&self) -> bool {
        self.callback.stop();
        let previous = std::mem::replace(&mut *self.state.lock(), State::Terminated);
        !matches!(previous, State::Terminated)
    }

    fn deliver(&self, store: &VersionedStore, target: &Arc<Snapshot>) -> bool {
        CollectionNotifier::deliver(self, store, target)
    }
}

impl fmt::Debug for CollectionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionNotifier")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::query::Predicate;
    use crate::schema::{ObjectSchema, Property, Schema};

    fn store(config: StoreConfig) -> VersionedStore {
        let schema = Schema::new(vec![ObjectSchema::new(
            "Item",
            vec![Property::int("value"), Property::string("label")],
        )])
        .unwrap();
        VersionedStore::new("notifier.realm", schema, config, Arc::new(MetricsRegistry::new()))
    }

    fn recording(store: &VersionedStore, spec: CollectionSpec) -> (CollectionNotifier, Arc<Mutex<Vec<CollectionChange>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = CollectionNotifier::new(
            NotifierId::new(1),
            spec,
            Box::new(move |change| sink.lock().push(change)),
            Arc::clone(store.metrics()),
        );
        notifier.attach();
        (notifier, seen)
    }

    fn add(store: &VersionedStore, value: i64) -> ObjKey {
        let mut tx = store.begin_write().unwrap();
        let key = tx.create_object("Item", [("value", value.into())]).unwrap();
        tx.commit();
        key
    }

    #[test]
    fn test_initial_then_update() {
        let store = store(StoreConfig::default());
        let spec = CollectionSpec::table(store.schema(), "Item").unwrap();
        let (notifier, seen) = recording(&store, spec);

        add(&store, 1);
        assert!(notifier.deliver(&store, &store.latest()));
        add(&store, 2);
        assert!(notifier.deliver(&store, &store.latest()));

        let seen = seen.lock();
        assert!(seen[0].is_initial());
        assert_eq!(seen[0].collection().unwrap().len(), 1);
        match &seen[1] {
            CollectionChange::Update { changes, .. } => assert_eq!(changes.insertions, [1]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(notifier.last_delivered(), Some(SnapshotVersion::new(2)));
    }

    #[test]
    fn test_stale_target_is_skipped() {
        let store = store(StoreConfig::default());
        let spec = CollectionSpec::table(store.schema(), "Item").unwrap();
        let (notifier, seen) = recording(&store, spec);
        let old = store.latest();
        add(&store, 1);
        assert!(notifier.deliver(&store, &store.latest()));
        assert!(!notifier.deliver(&store, &old));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_empty_update_advances_silently() {
        let store = store(StoreConfig::default());
        let spec = CollectionSpec::table(store.schema(), "Item")
            .unwrap()
            .filtered(Predicate::gt("value", 10));
        let (notifier, seen) = recording(&store, spec);
        notifier.deliver(&store, &store.latest());
        add(&store, 1);
        assert!(!notifier.deliver(&store, &store.latest()));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(notifier.last_delivered(), Some(SnapshotVersion::new(1)));
        assert_eq!(store.metrics().snapshot().empty_updates_suppressed, 1);
    }

    #[test]
    fn test_evicted_version_resets_to_initial() {
        let store = store(StoreConfig::bounded(1));
        let spec = CollectionSpec::table(store.schema(), "Item").unwrap();
        let (notifier, seen) = recording(&store, spec);
        notifier.deliver(&store, &store.latest());
        for value in 0..4 {
            add(&store, value);
        }
        assert!(notifier.deliver(&store, &store.latest()));
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].is_initial());
        assert_eq!(seen[1].collection().unwrap().len(), 4);
        assert_eq!(store.metrics().snapshot().notifier_resets, 1);
    }

    #[test]
    fn test_invalid_predicate_delivers_error_once() {
        let store = store(StoreConfig::default());
        let spec = CollectionSpec::table(store.schema(), "Item")
            .unwrap()
            .filtered(Predicate::eq("missing", 1));
        let (notifier, seen) = recording(&store, spec);
        assert!(notifier.deliver(&store, &store.latest()));
        add(&store, 1);
        assert!(!notifier.deliver(&store, &store.latest()));
        assert_eq!(notifier.phase(), NotifierPhase::Terminated);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], CollectionChange::Error(Error::InvalidPredicate(_))));
    }

    #[test]
    fn test_key_paths_limit_modifications() {
        let store = store(StoreConfig::default());
        let item = add(&store, 1);
        let spec = CollectionSpec::table(store.schema(), "Item").unwrap();
        let paths = KeyPaths::resolve(store.schema(), spec.table_id(), &["value"]).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = CollectionNotifier::new(
            NotifierId::new(1),
            spec,
            Box::new(move |change| sink.lock().push(change)),
            Arc::clone(store.metrics()),
        )
        .with_key_paths(paths);
        notifier.attach();
        assert!(notifier.deliver(&store, &store.latest()));

        let mut tx = store.begin_write().unwrap();
        tx.set("Item", item, "label", "renamed").unwrap();
        tx.commit();
        assert!(!notifier.deliver(&store, &store.latest()));

        let mut tx = store.begin_write().unwrap();
        tx.set("Item", item, "value", 2).unwrap();
        tx.commit();
        assert!(notifier.deliver(&store, &store.latest()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        match &seen[1] {
            CollectionChange::Update { changes, .. } => assert_eq!(changes.modifications, [0]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_terminated_notifier_is_silent() {
        let store = store(StoreConfig::default());
        let spec = CollectionSpec::table(store.schema(), "Item").unwrap();
        let (notifier, seen) = recording(&store, spec);
        assert!(notifier.terminate());
        assert!(!notifier.terminate());
        assert!(!notifier.deliver(&store, &store.latest()));
        assert!(seen.lock().is_empty());
    }
}

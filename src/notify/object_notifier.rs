//! ObjectNotifier - observation of a single object
//!
//! Unlike a collection notifier there is no initial delivery: the notifier
//! starts from the version the object was observed at and reports only
//! later changes. Deletion of the object is delivered once and ends the
//! registration, as does an error.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::callback::{Callback, CallbackSlot};
use super::notifier::{Notifier, NotifierId};
use crate::changes::{ChangeComputer, KeyPaths, ObjectChange, PropertyChange};
use crate::collection::ObjectRef;
use crate::error::{Error, Result};
use crate::mvcc::{NotifierPin, Snapshot, VersionedStore};
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::schema::{ObjKey, TableId};

enum State {
    Watching { pin: NotifierPin },
    Terminated,
}

enum Step {
    Skip,
    Unchanged(NotifierPin),
    Changed(NotifierPin, ObjectChange),
    Deleted,
}

/// Per-registration state and callback for one observed object.
pub struct ObjectNotifier {
    id: NotifierId,
    table: TableId,
    key: ObjKey,
    key_paths: Option<KeyPaths>,
    state: Mutex<State>,
    callback: CallbackSlot<ObjectChange>,
    metrics: Arc<MetricsRegistry>,
}

impl ObjectNotifier {
    /// Creates a notifier reporting changes after the version `baseline`
    /// pins.
    pub fn new(
        id: NotifierId,
        table: TableId,
        key: ObjKey,
        baseline: NotifierPin,
        callback: Callback<ObjectChange>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            id,
            table,
            key,
            key_paths: None,
            state: Mutex::new(State::Watching { pin: baseline }),
            callback: CallbackSlot::new(callback),
            metrics,
        }
    }

    /// Limits reported properties to those starting one of `key_paths`.
    pub fn with_key_paths(mut self, key_paths: KeyPaths) -> Self {
        self.key_paths = Some(key_paths);
        self
    }

    pub fn key(&self) -> ObjKey {
        self.key
    }

    pub fn is_terminated(&self) -> bool {
        matches!(*self.state.lock(), State::Terminated)
    }

    fn advance(&self, state: &State, store: &VersionedStore, target: &Arc<Snapshot>) -> Result<Step> {
        let State::Watching { pin } = state else {
            return Ok(Step::Skip);
        };
        if target.version() <= pin.version() {
            return Ok(Step::Skip);
        }
        if target.object(self.table, self.key).is_none() {
            return Ok(Step::Deleted);
        }

        let properties = match pin.snapshot() {
            Ok(previous) => ChangeComputer::object_changes(
                &previous,
                target,
                self.table,
                self.key,
                self.key_paths.as_ref(),
            ),
            Err(Error::VersionNotAvailable(version)) => {
                self.metrics.increment_notifier_resets();
                log_event(
                    Event::NotifierReset,
                    &[("notifier", &self.id.to_string()), ("version", &version.to_string())],
                );
                self.all_properties(target)
            }
            Err(error) => return Err(error),
        };

        let pin = store.pin_notifier(target.version())?;
        if properties.is_empty() {
            return Ok(Step::Unchanged(pin));
        }
        let object = ObjectRef::new(Arc::clone(target), self.table, self.key);
        Ok(Step::Changed(pin, ObjectChange::Change { object, properties }))
    }

    /// Every observed property with its current value, used when the
    /// previous version is gone and nothing can be compared.
    fn all_properties(&self, target: &Snapshot) -> Vec<PropertyChange> {
        let Some(row) = target.object(self.table, self.key) else {
            return Vec::new();
        };
        target
            .schema()
            .object_schema(self.table)
            .stored_properties()
            .filter(|(slot, _)| {
                self.key_paths
                    .as_ref()
                    .map_or(true, |paths| paths.observes_slot(*slot))
            })
            .map(|(slot, property)| PropertyChange {
                name: property.name.clone(),
                old_value: None,
                new_value: Some(row.get(slot).clone()),
            })
            .collect()
    }
}

impl Notifier for ObjectNotifier {
    fn id(&self) -> NotifierId {
        self.id
    }

    fn attach(&self) {}

    fn stop_callback(&self) {
        self.callback.stop();
    }

    fn terminate(&self) -> bool {
        self.callback.stop();
        let previous = std::mem::replace(&mut *self.state.lock(), State::Terminated);
        !matches!(previous, State::Terminated)
    }

    fn deliver(&self, store: &VersionedStore, target: &Arc<Snapshot>) -> bool {
        if self.callback.is_stopped() {
            return false;
        }

        let change = {
            let mut state = self.state.lock();
            match self.advance(&state, store, target) {
                Ok(Step::Skip) => return false,
                Ok(Step::Unchanged(pin)) => {
                    *state = State::Watching { pin };
                    return false;
                }
                Ok(Step::Changed(pin, change)) => {
                    *state = State::Watching { pin };
                    change
                }
                Ok(Step::Deleted) => {
                    *state = State::Terminated;
                    ObjectChange::Deleted
                }
                Err(error) => {
                    *state = State::Terminated;
                    log_event(
                        Event::NotifierFailed,
                        &[("notifier", &self.id.to_string()), ("error", &error.to_string())],
                    );
                    ObjectChange::Error(error)
                }
            }
        };

        let counter: fn(&MetricsRegistry) = match &change {
            ObjectChange::Error(_) => MetricsRegistry::increment_error_deliveries,
            _ => MetricsRegistry::increment_update_deliveries,
        };
        let delivered = self.callback.invoke(change);
        if delivered {
            counter(&self.metrics);
        }
        delivered
    }
}

impl fmt::Debug for ObjectNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectNotifier")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::schema::{ObjectSchema, Property, Schema, Value};

    fn store(config: StoreConfig) -> VersionedStore {
        let schema = Schema::new(vec![ObjectSchema::new(
            "Item",
            vec![Property::int("value"), Property::bool("flag")],
        )])
        .unwrap();
        VersionedStore::new("object.realm", schema, config, Arc::new(MetricsRegistry::new()))
    }

    fn watch(store: &VersionedStore, key: ObjKey) -> (ObjectNotifier, Arc<Mutex<Vec<ObjectChange>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let table = store.schema().table_id("Item").unwrap();
        let baseline = store.pin_notifier(store.current_version()).unwrap();
        let notifier = ObjectNotifier::new(
            NotifierId::new(1),
            table,
            key,
            baseline,
            Box::new(move |change| sink.lock().push(change)),
            Arc::clone(store.metrics()),
        );
        (notifier, seen)
    }

    fn create(store: &VersionedStore, value: i64) -> ObjKey {
        let mut tx = store.begin_write().unwrap();
        let key = tx.create_object("Item", [("value", value.into())]).unwrap();
        tx.commit();
        key
    }

    fn update(store: &VersionedStore, key: ObjKey, property: &str, value: impl Into<Value>) {
        let mut tx = store.begin_write().unwrap();
        tx.set("Item", key, property, value).unwrap();
        tx.commit();
    }

    #[test]
    fn test_no_delivery_without_change() {
        let store = store(StoreConfig::default());
        let key = create(&store, 1);
        let (notifier, seen) = watch(&store, key);
        assert!(!notifier.deliver(&store, &store.latest()));
        create(&store, 2);
        assert!(!notifier.deliver(&store, &store.latest()));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_change_reports_old_and_new_values() {
        let store = store(StoreConfig::default());
        let key = create(&store, 1);
        let (notifier, seen) = watch(&store, key);
        update(&store, key, "value", 2);
        assert!(notifier.deliver(&store, &store.latest()));

        let seen = seen.lock();
        match &seen[0] {
            ObjectChange::Change { object, properties } => {
                assert_eq!(object.key(), key);
                assert_eq!(
                    properties,
                    &vec![PropertyChange {
                        name: "value".to_string(),
                        old_value: Some(Value::Int(1)),
                        new_value: Some(Value::Int(2)),
                    }]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_key_paths_filter_properties() {
        let store = store(StoreConfig::default());
        let key = create(&store, 1);
        let (notifier, seen) = watch(&store, key);
        let table = store.schema().table_id("Item").unwrap();
        let notifier = notifier.with_key_paths(KeyPaths::resolve(store.schema(), table, &["flag"]).unwrap());

        update(&store, key, "value", 5);
        assert!(!notifier.deliver(&store, &store.latest()));
        update(&store, key, "flag", true);
        assert!(notifier.deliver(&store, &store.latest()));
        assert_eq!(seen.lock()[0].property_names(), vec!["flag"]);
    }

    #[test]
    fn test_deletion_is_delivered_once() {
        let store = store(StoreConfig::default());
        let key = create(&store, 1);
        let (notifier, seen) = watch(&store, key);

        let mut tx = store.begin_write().unwrap();
        tx.delete_object("Item", key).unwrap();
        tx.commit();
        assert!(notifier.deliver(&store, &store.latest()));
        create(&store, 3);
        assert!(!notifier.deliver(&store, &store.latest()));

        assert!(notifier.is_terminated());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], ObjectChange::Deleted));
    }

    #[test]
    fn test_evicted_baseline_reports_every_property() {
        let store = store(StoreConfig::bounded(1));
        let key = create(&store, 1);
        let (notifier, seen) = watch(&store, key);
        update(&store, key, "value", 2);
        update(&store, key, "value", 3);
        assert!(notifier.deliver(&store, &store.latest()));

        let seen = seen.lock();
        assert_eq!(seen[0].property_names(), vec!["value", "flag"]);
        assert_eq!(store.metrics().snapshot().notifier_resets, 1);
    }
}

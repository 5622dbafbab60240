//! NotificationCoordinator - per-file notifier registry
//!
//! One coordinator exists per open file. It is registered with the file's
//! store as a commit observer; on every commit it asks each live delivery
//! target (one per open realm) to schedule a delivery pass on its own run
//! loop. It never runs change computation or callbacks itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::notifier::{Notifier, NotifierId};
use crate::mvcc::{CommitObserver, SnapshotVersion};
use crate::observability::{log_event, Event, MetricsRegistry};

/// Something that delivers notifications on its own executor.
pub(crate) trait DeliveryTarget: Send + Sync {
    /// Requests a delivery pass. Must not block.
    fn schedule_delivery(&self);
}

/// Identity of a delivery target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

struct Registration {
    notifier: Arc<dyn Notifier>,
    target: TargetId,
}

/// Registry of the live notifiers for one file.
pub struct NotificationCoordinator {
    path: String,
    next_id: AtomicU64,
    registry: RwLock<HashMap<NotifierId, Registration>>,
    targets: RwLock<HashMap<TargetId, Weak<dyn DeliveryTarget>>>,
    metrics: Arc<MetricsRegistry>,
}

impl NotificationCoordinator {
    pub fn new(path: impl Into<String>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            path: path.into(),
            next_id: AtomicU64::new(1),
            registry: RwLock::new(HashMap::new()),
            targets: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Allocates a notifier id
    pub fn next_notifier_id(&self) -> NotifierId {
        NotifierId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add_target(&self, target: Weak<dyn DeliveryTarget>) -> TargetId {
        let id = TargetId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.targets.write().insert(id, target);
        id
    }

    /// Removes a target and terminates its notifiers.
    pub(crate) fn remove_target(&self, target: TargetId) {
        self.targets.write().remove(&target);
        self.terminate_target(target);
    }

    /// Terminates every notifier delivered by `target`. The target stays
    /// registered.
    pub(crate) fn terminate_target(&self, target: TargetId) {
        let removed: Vec<Arc<dyn Notifier>> = {
            let mut registry = self.registry.write();
            let ids: Vec<NotifierId> = registry
                .iter()
                .filter(|(_, r)| r.target == target)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| registry.remove(id))
                .map(|r| r.notifier)
                .collect()
        };
        for notifier in removed {
            self.retire(notifier.as_ref());
        }
    }

    /// Registers an attached notifier with its delivery target and
    /// schedules that target so the Initial is delivered.
    pub(crate) fn register(&self, notifier: Arc<dyn Notifier>, target: TargetId) {
        notifier.attach();
        let id = notifier.id();
        self.registry.write().insert(id, Registration { notifier, target });
        self.metrics.increment_notifiers_registered();
        log_event(
            Event::NotifierRegistered,
            &[("path", &self.path), ("notifier", &id.to_string())],
        );
        self.schedule(target);
    }

    /// Removes a notifier. Returns false if it was not registered.
    pub fn unregister(&self, id: NotifierId) -> bool {
        let removed = self.registry.write().remove(&id);
        match removed {
            Some(registration) => {
                self.retire(registration.notifier.as_ref());
                true
            }
            None => false,
        }
    }

    fn retire(&self, notifier: &dyn Notifier) {
        if notifier.terminate() {
            self.metrics.increment_notifiers_terminated();
            log_event(
                Event::NotifierTerminated,
                &[("path", &self.path), ("notifier", &notifier.id().to_string())],
            );
        }
    }

    /// Notifiers delivered by `target`, in registration order
    pub(crate) fn notifiers_for(&self, target: TargetId) -> Vec<Arc<dyn Notifier>> {
        let mut notifiers: Vec<Arc<dyn Notifier>> = self
            .registry
            .read()
            .values()
            .filter(|r| r.target == target)
            .map(|r| Arc::clone(&r.notifier))
            .collect();
        notifiers.sort_by_key(|n| n.id());
        notifiers
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Asks every live target to schedule a delivery pass.
    pub fn notify_all(&self, version: SnapshotVersion) {
        let targets: Vec<Arc<dyn DeliveryTarget>> = {
            let mut targets = self.targets.write();
            targets.retain(|_, t| t.strong_count() > 0);
            targets.values().filter_map(Weak::upgrade).collect()
        };
        tracing::trace!(path = %self.path, %version, targets = targets.len(), "fan-out");
        for target in targets {
            target.schedule_delivery();
        }
    }

    fn schedule(&self, target: TargetId) {
        let target = self.targets.read().get(&target).and_then(Weak::upgrade);
        if let Some(target) = target {
            target.schedule_delivery();
        }
    }
}

impl CommitObserver for NotificationCoordinator {
    fn on_commit(&self, version: SnapshotVersion) {
        self.notify_all(version);
    }
}

impl fmt::Debug for NotificationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationCoordinator")
            .field("path", &self.path)
            .field("notifiers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionSpec;
    use crate::config::StoreConfig;
    use crate::mvcc::VersionedStore;
    use crate::notify::{CollectionNotifier, NotifierPhase, ObjectNotifier};
    use crate::schema::{ObjectSchema, Property, Schema};
    use std::sync::atomic::AtomicUsize;

    struct CountingTarget(AtomicUsize);

    impl DeliveryTarget for CountingTarget {
        fn schedule_delivery(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn coordinator() -> NotificationCoordinator {
        NotificationCoordinator::new("coordinator.realm", Arc::new(MetricsRegistry::new()))
    }

    fn add(coordinator: &NotificationCoordinator, target: &Arc<CountingTarget>) -> TargetId {
        let weak: Weak<CountingTarget> = Arc::downgrade(target);
        coordinator.add_target(weak)
    }

    fn notifier(coordinator: &NotificationCoordinator) -> Arc<CollectionNotifier> {
        let schema = Schema::new(vec![ObjectSchema::new("Item", vec![Property::int("v")])]).unwrap();
        Arc::new(CollectionNotifier::new(
            coordinator.next_notifier_id(),
            CollectionSpec::table(&schema, "Item").unwrap(),
            Box::new(|_| {}),
            Arc::new(MetricsRegistry::new()),
        ))
    }

    #[test]
    fn test_register_schedules_target() {
        let coordinator = coordinator();
        let target = Arc::new(CountingTarget(AtomicUsize::new(0)));
        let id = add(&coordinator, &target);

        let n = notifier(&coordinator);
        coordinator.register(n.clone(), id);
        assert_eq!(n.phase(), NotifierPhase::AwaitingInitial);
        assert_eq!(target.0.load(Ordering::SeqCst), 1);

        coordinator.on_commit(SnapshotVersion::new(1));
        assert_eq!(target.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister_terminates() {
        let coordinator = coordinator();
        let target = Arc::new(CountingTarget(AtomicUsize::new(0)));
        let id = add(&coordinator, &target);
        let n = notifier(&coordinator);
        coordinator.register(n.clone(), id);

        assert!(coordinator.unregister(n.id()));
        assert!(!coordinator.unregister(n.id()));
        assert_eq!(n.phase(), NotifierPhase::Terminated);
        assert!(coordinator.is_empty());
    }

    #[test]
    fn test_notifiers_sorted_per_target() {
        let coordinator = coordinator();
        let a = Arc::new(CountingTarget(AtomicUsize::new(0)));
        let b = Arc::new(CountingTarget(AtomicUsize::new(0)));
        let ta = add(&coordinator, &a);
        let tb = add(&coordinator, &b);

        let first = notifier(&coordinator);
        let second = notifier(&coordinator);
        let other = notifier(&coordinator);
        coordinator.register(second.clone(), ta);
        coordinator.register(first.clone(), ta);
        coordinator.register(other.clone(), tb);

        let ids: Vec<NotifierId> = coordinator.notifiers_for(ta).iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);

        coordinator.remove_target(ta);
        assert_eq!(coordinator.len(), 1);
        assert_eq!(first.phase(), NotifierPhase::Terminated);
        assert_eq!(other.phase(), NotifierPhase::AwaitingInitial);
    }

    #[test]
    fn test_object_notifiers_share_the_registry() {
        let coordinator = coordinator();
        let target = Arc::new(CountingTarget(AtomicUsize::new(0)));
        let id = add(&coordinator, &target);

        let schema = Schema::new(vec![ObjectSchema::new("Item", vec![Property::int("v")])]).unwrap();
        let store = VersionedStore::new("coordinator.realm", schema, StoreConfig::default(), Arc::new(MetricsRegistry::new()));
        let mut tx = store.begin_write().unwrap();
        let key = tx.create_object("Item", []).unwrap();
        tx.commit();

        let table = store.schema().table_id("Item").unwrap();
        let object = Arc::new(ObjectNotifier::new(
            coordinator.next_notifier_id(),
            table,
            key,
            store.pin_notifier(store.current_version()).unwrap(),
            Box::new(|_| {}),
            Arc::clone(store.metrics()),
        ));
        let collection = notifier(&coordinator);
        coordinator.register(collection.clone(), id);
        coordinator.register(object.clone(), id);
        assert_eq!(coordinator.notifiers_for(id).len(), 2);

        coordinator.terminate_target(id);
        assert!(object.is_terminated());
        assert_eq!(collection.phase(), NotifierPhase::Terminated);
        assert!(coordinator.is_empty());
    }

    #[test]
    fn test_dropped_targets_are_skipped() {
        let coordinator = coordinator();
        let target = Arc::new(CountingTarget(AtomicUsize::new(0)));
        add(&coordinator, &target);
        drop(target);
        coordinator.notify_all(SnapshotVersion::new(1));
        assert!(coordinator.targets.read().is_empty());
    }
}

//! Versioned Store Tests
//!
//! Tests for the snapshot-isolated store:
//! - Readers never observe partial writes
//! - Single writer per store
//! - Snapshot retention and pruning
//! - Link integrity on delete

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use livestore::observability::MetricsRegistry;
use livestore::{
    Error, ObjectSchema, Property, ReadTransaction, Schema, SnapshotVersion, StoreConfig, Value,
    VersionedStore,
};

fn schema() -> Schema {
    Schema::new(vec![
        ObjectSchema::new(
            "Person",
            vec![
                Property::string("name"),
                Property::int("age"),
                Property::object("dog", "Dog"),
                Property::list("dogs", "Dog"),
                Property::dictionary("pets", "Dog"),
            ],
        ),
        ObjectSchema::new("Dog", vec![Property::string("name")]),
    ])
    .unwrap()
}

fn store(config: StoreConfig) -> VersionedStore {
    VersionedStore::new(
        "store.realm",
        schema(),
        config,
        Arc::new(MetricsRegistry::new()),
    )
}

// =============================================================================
// Snapshot Isolation Tests
// =============================================================================

/// A reader pinned before a commit keeps seeing the old data.
#[test]
fn test_reader_isolated_from_later_commit() {
    let store = store(StoreConfig::default());
    let mut tx = store.begin_write().unwrap();
    let alice = tx
        .create_object("Person", [("name", "alice".into()), ("age", 30.into())])
        .unwrap();
    tx.commit();

    let reader = ReadTransaction::begin(&store).unwrap();
    let people = store.schema().table_id("Person").unwrap();

    let mut tx = store.begin_write().unwrap();
    tx.set("Person", alice, "age", 31).unwrap();
    tx.commit();

    assert_eq!(
        reader.snapshot().value(people, alice, "age").unwrap(),
        &Value::Int(30)
    );
    assert!(reader.is_stale());
    assert_eq!(
        store.latest().value(people, alice, "age").unwrap(),
        &Value::Int(31)
    );
}

/// Uncommitted changes are invisible; a cancelled write publishes nothing.
#[test]
fn test_cancelled_write_publishes_nothing() {
    let store = store(StoreConfig::default());
    let mut tx = store.begin_write().unwrap();
    tx.create_object("Dog", [("name", "rex".into())]).unwrap();
    assert_eq!(store.current_version(), SnapshotVersion::INITIAL);
    tx.cancel();

    assert_eq!(store.current_version(), SnapshotVersion::INITIAL);
    assert!(!store.is_write_locked());
    let dogs = store.schema().table_id("Dog").unwrap();
    assert!(store.latest().table(dogs).is_empty());
}

/// Versions observed by a reader never go backward.
#[test]
fn test_read_transaction_only_advances() {
    let store = store(StoreConfig::default());
    let mut reader = ReadTransaction::begin(&store).unwrap();
    let old_pin = store.pin(None).unwrap();

    let mut tx = store.begin_write().unwrap();
    tx.create_object("Dog", []).unwrap();
    tx.commit();

    assert!(reader.advance().unwrap());
    assert_eq!(reader.version(), SnapshotVersion::new(1));
    assert!(!reader.advance_to(old_pin));
    assert_eq!(reader.version(), SnapshotVersion::new(1));
}

// =============================================================================
// Writer Discipline Tests
// =============================================================================

/// A second writer on another thread waits for the first to finish.
#[test]
fn test_writers_are_serialized_across_threads() {
    let store = store(StoreConfig::default());
    let tx = store.begin_write().unwrap();

    let other = store.clone();
    let handle = thread::spawn(move || {
        let mut tx = other.begin_write().unwrap();
        tx.create_object("Dog", []).unwrap();
        tx.commit()
    });

    thread::sleep(Duration::from_millis(20));
    assert_eq!(store.current_version(), SnapshotVersion::INITIAL);
    assert_eq!(tx.commit(), SnapshotVersion::new(1));
    assert_eq!(handle.join().unwrap(), SnapshotVersion::new(2));
}

/// `try_begin_write` fails fast while a write is open.
#[test]
fn test_try_begin_write_conflict() {
    let store = store(StoreConfig::default());
    let _tx = store.begin_write().unwrap();
    let other = store.clone();
    let result = thread::spawn(move || other.try_begin_write().map(|_| ()))
        .join()
        .unwrap();
    assert!(matches!(result, Err(Error::WriteConflict { .. })));
    assert_eq!(store.metrics().snapshot().write_conflicts, 1);
}

// =============================================================================
// Retention Tests
// =============================================================================

/// Unpinned history is pruned; pinned history is kept.
#[test]
fn test_unpinned_versions_are_pruned() {
    let store = store(StoreConfig::default());
    let pinned = store.pin(None).unwrap();
    for _ in 0..3 {
        let mut tx = store.begin_write().unwrap();
        tx.create_object("Dog", []).unwrap();
        tx.commit();
    }

    assert_eq!(
        store.retained_versions(),
        vec![SnapshotVersion::INITIAL, SnapshotVersion::new(3)]
    );
    drop(pinned);
    assert_eq!(store.retained_versions(), vec![SnapshotVersion::new(3)]);
    assert!(matches!(
        store.pin(Some(SnapshotVersion::new(1))),
        Err(Error::VersionNotAvailable(_))
    ));
}

/// With a history limit, notifier-pinned versions are evicted oldest
/// first, reader-pinned versions never.
#[test]
fn test_history_limit_evicts_notifier_pins_only() {
    let store = store(StoreConfig::bounded(2));
    let reader = store.pin(None).unwrap();
    let notifier = store.pin_notifier(SnapshotVersion::INITIAL).unwrap();

    let mut tx = store.begin_write().unwrap();
    tx.create_object("Dog", []).unwrap();
    tx.commit();
    let notifier_v1 = store.pin_notifier(SnapshotVersion::new(1)).unwrap();

    let mut tx = store.begin_write().unwrap();
    tx.create_object("Dog", []).unwrap();
    tx.commit();

    assert!(notifier.snapshot().is_ok());
    assert!(matches!(
        notifier_v1.snapshot(),
        Err(Error::VersionNotAvailable(_))
    ));
    assert_eq!(reader.version(), SnapshotVersion::INITIAL);
    assert!(store.metrics().snapshot().snapshots_evicted >= 1);
}

/// Reader pins and notifier pins both keep their versions alive.
#[test]
fn test_retention_states() {
    let store = store(StoreConfig::default());
    let _reader = store.pin(None).unwrap();
    let mut tx = store.begin_write().unwrap();
    tx.create_object("Dog", []).unwrap();
    tx.commit();
    let _notifier = store.pin_notifier(SnapshotVersion::new(1)).unwrap();
    let mut tx = store.begin_write().unwrap();
    tx.create_object("Dog", []).unwrap();
    tx.commit();

    assert_eq!(
        store.retained_versions(),
        vec![
            SnapshotVersion::INITIAL,
            SnapshotVersion::new(1),
            SnapshotVersion::new(2)
        ]
    );
}

// =============================================================================
// Link Integrity Tests
// =============================================================================

/// Deleting an object clears every link to it in the same commit.
#[test]
fn test_delete_clears_links() {
    let store = store(StoreConfig::default());
    let mut tx = store.begin_write().unwrap();
    let rex = tx.create_object("Dog", [("name", "rex".into())]).unwrap();
    let fido = tx.create_object("Dog", [("name", "fido".into())]).unwrap();
    let alice = tx
        .create_object("Person", [("name", "alice".into()), ("dog", rex.into())])
        .unwrap();
    tx.list_push("Person", alice, "dogs", rex).unwrap();
    tx.list_push("Person", alice, "dogs", fido).unwrap();
    tx.list_push("Person", alice, "dogs", rex).unwrap();
    tx.dictionary_insert("Person", alice, "pets", "best", rex).unwrap();
    tx.commit();

    let mut tx = store.begin_write().unwrap();
    tx.delete_object("Dog", rex).unwrap();
    tx.commit();

    let people = store.schema().table_id("Person").unwrap();
    let snapshot = store.latest();
    assert_eq!(snapshot.value(people, alice, "dog").unwrap(), &Value::Null);
    assert_eq!(
        snapshot.value(people, alice, "dogs").unwrap(),
        &Value::List(vec![fido])
    );
    assert_eq!(
        snapshot.value(people, alice, "pets").unwrap(),
        &Value::Dictionary(Default::default())
    );
}

/// Writes reject values that do not fit the schema.
#[test]
fn test_write_validation() {
    let store = store(StoreConfig::default());
    let mut tx = store.begin_write().unwrap();
    let alice = tx.create_object("Person", []).unwrap();

    assert!(matches!(
        tx.set("Person", alice, "age", "old"),
        Err(Error::Schema(_))
    ));
    assert!(matches!(
        tx.set("Person", alice, "dog", Value::Link(livestore::ObjKey::new(99))),
        Err(Error::ObjectNotFound { .. })
    ));
    assert!(tx.create_object("Cat", []).is_err());
}

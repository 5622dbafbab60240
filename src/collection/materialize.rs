//! Evaluates a collection spec against a snapshot
//!
//! The result is the ordered list of row identities the collection holds
//! at that version: source order, then filter, then a stable sort.

use std::cmp::Ordering;

use super::{CollectionSource, CollectionSpec};
use crate::error::Result;
use crate::mvcc::Snapshot;
use crate::query::CompiledSort;
use crate::schema::{ObjKey, TableId, Value};

/// Evaluates `spec` at `snapshot`.
///
/// A link collection whose owning object no longer exists is empty.
///
/// # Errors
///
/// `InvalidPredicate` if the filter or sort does not fit the element type.
pub fn materialize(spec: &CollectionSpec, snapshot: &Snapshot) -> Result<Vec<ObjKey>> {
    let object_schema = snapshot.schema().object_schema(spec.table_id());
    let filter = spec
        .filter()
        .map(|p| p.compile(object_schema))
        .transpose()?;
    let sort = CompiledSort::compile(spec.sort(), object_schema)?;

    let table = snapshot.table(spec.table_id());
    let mut rows = source_rows(spec, snapshot);
    rows.retain(|key| match table.get(*key) {
        Some(row) => filter.as_ref().map_or(true, |f| f.matches(row)),
        None => false,
    });

    if !sort.is_empty() {
        rows.sort_by(|a, b| match (table.get(*a), table.get(*b)) {
            (Some(x), Some(y)) => sort.compare(x, y),
            _ => Ordering::Equal,
        });
    }
    Ok(rows)
}

fn link_slot(snapshot: &Snapshot, owner: TableId, object: ObjKey, property: &str) -> Option<Value> {
    let slot = snapshot.schema().object_schema(owner).slot(property)?;
    snapshot
        .object(owner, object)
        .map(|data| data.get(slot).clone())
}

fn source_rows(spec: &CollectionSpec, snapshot: &Snapshot) -> Vec<ObjKey> {
    match spec.source() {
        CollectionSource::Table => snapshot.table(spec.table_id()).keys().collect(),
        CollectionSource::List {
            owner,
            object,
            property,
        }
        | CollectionSource::Set {
            owner,
            object,
            property,
        }
        | CollectionSource::Dictionary {
            owner,
            object,
            property,
        } => link_slot(snapshot, *owner, *object, property)
            .map(|value| value.links())
            .unwrap_or_default(),
        CollectionSource::LinkingObjects {
            object,
            origin,
            property,
        } => backlinks(snapshot, *origin, property, *object),
    }
}

/// Origin objects whose `property` links to `object`, each once, in key order.
pub(crate) fn backlinks(snapshot: &Snapshot, origin: TableId, property: &str, object: ObjKey) -> Vec<ObjKey> {
    let Some(slot) = snapshot.schema().object_schema(origin).slot(property) else {
        return Vec::new();
    };
    snapshot
        .table(origin)
        .iter()
        .filter(|(_, data)| data.get(slot).links_to(object))
        .map(|(key, _)| key)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::mvcc::VersionedStore;
    use crate::observability::MetricsRegistry;
    use crate::query::{Predicate, SortDescriptor};
    use crate::schema::{ObjectSchema, Property, Schema};
    use std::sync::Arc;

    fn store() -> VersionedStore {
        let schema = Schema::new(vec![
            ObjectSchema::new(
                "Person",
                vec![Property::string("name"), Property::list("dogs", "Dog")],
            ),
            ObjectSchema::new(
                "Dog",
                vec![
                    Property::string("name"),
                    Property::int("age"),
                    Property::linking_objects("owners", "Person", "dogs"),
                ],
            ),
        ])
        .unwrap();
        VersionedStore::new(
            "materialize.realm",
            schema,
            StoreConfig::default(),
            Arc::new(MetricsRegistry::new()),
        )
    }

    struct Fixture {
        store: VersionedStore,
        alice: ObjKey,
        dogs: Vec<ObjKey>,
    }

    fn fixture() -> Fixture {
        let store = store();
        let mut tx = store.begin_write().unwrap();
        let dogs: Vec<ObjKey> = [("rex", 5), ("fido", 2), ("spot", 9)]
            .into_iter()
            .map(|(name, age)| {
                tx.create_object("Dog", [("name", name.into()), ("age", age.into())])
                    .unwrap()
            })
            .collect();
        let alice = tx.create_object("Person", [("name", "alice".into())]).unwrap();
        tx.list_push("Person", alice, "dogs", dogs[2]).unwrap();
        tx.list_push("Person", alice, "dogs", dogs[0]).unwrap();
        tx.list_push("Person", alice, "dogs", dogs[2]).unwrap();
        tx.commit();
        Fixture { store, alice, dogs }
    }

    #[test]
    fn test_table_order_is_key_order() {
        let f = fixture();
        let spec = CollectionSpec::table(f.store.schema(), "Dog").unwrap();
        assert_eq!(materialize(&spec, &f.store.latest()).unwrap(), f.dogs);
    }

    #[test]
    fn test_filter_and_sort() {
        let f = fixture();
        let spec = CollectionSpec::table(f.store.schema(), "Dog")
            .unwrap()
            .filtered(Predicate::gt("age", 3))
            .sorted(vec![SortDescriptor::desc("age")]);
        assert_eq!(
            materialize(&spec, &f.store.latest()).unwrap(),
            vec![f.dogs[2], f.dogs[0]]
        );
    }

    #[test]
    fn test_list_keeps_order_and_duplicates() {
        let f = fixture();
        let spec = CollectionSpec::property(f.store.schema(), "Person", f.alice, "dogs").unwrap();
        assert_eq!(
            materialize(&spec, &f.store.latest()).unwrap(),
            vec![f.dogs[2], f.dogs[0], f.dogs[2]]
        );
    }

    #[test]
    fn test_linking_objects_include_origin_once() {
        let f = fixture();
        let spec = CollectionSpec::property(f.store.schema(), "Dog", f.dogs[2], "owners").unwrap();
        assert_eq!(materialize(&spec, &f.store.latest()).unwrap(), vec![f.alice]);

        let spec = CollectionSpec::property(f.store.schema(), "Dog", f.dogs[1], "owners").unwrap();
        assert!(materialize(&spec, &f.store.latest()).unwrap().is_empty());
    }

    #[test]
    fn test_deleted_owner_gives_empty_list() {
        let f = fixture();
        let mut tx = f.store.begin_write().unwrap();
        tx.delete_object("Person", f.alice).unwrap();
        tx.commit();

        let spec = CollectionSpec::property(f.store.schema(), "Person", f.alice, "dogs").unwrap();
        assert!(materialize(&spec, &f.store.latest()).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_filter_surfaces_on_evaluation() {
        let f = fixture();
        let spec = CollectionSpec::table(f.store.schema(), "Dog")
            .unwrap()
            .filtered(Predicate::eq("weight", 3));
        let err = materialize(&spec, &f.store.latest()).unwrap_err();
        assert_eq!(err.code(), "LIVE_INVALID_PREDICATE");
    }
}

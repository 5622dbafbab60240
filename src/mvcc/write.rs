//! Write transactions
//!
//! A write transaction works on private copies of the tables it touches
//! and publishes them as a new snapshot on commit. Dropping an unfinished
//! transaction cancels it and releases the write lock.

use std::sync::Arc;

use super::{ObjectData, Snapshot, SnapshotPin, SnapshotVersion, Table, VersionedStore};
use crate::error::{Error, Result};
use crate::observability::{log_event, Event};
use crate::schema::validator::validate_value;
use crate::schema::{ObjKey, ObjectSchema, PropertyKind, TableId, Value};

/// An open write transaction. Holds the store's write lock.
pub struct WriteTransaction {
    store: VersionedStore,
    base: Arc<Snapshot>,
    tables: Vec<Arc<Table>>,
    finished: bool,
}

impl WriteTransaction {
    pub(crate) fn new(store: VersionedStore, base: Arc<Snapshot>) -> Self {
        let tables = base.tables().to_vec();
        Self {
            store,
            base,
            tables,
            finished: false,
        }
    }

    /// Version this transaction was started from
    pub fn base_version(&self) -> SnapshotVersion {
        self.base.version()
    }

    fn table_id(&self, object_type: &str) -> Result<TableId> {
        self.store.schema().require_table(object_type)
    }

    fn object_schema(&self, table: TableId) -> &ObjectSchema {
        self.store.schema().object_schema(table)
    }

    fn table_mut(&mut self, table: TableId) -> &mut Table {
        Arc::make_mut(&mut self.tables[table.index()])
    }

    fn not_found(&self, table: TableId, key: ObjKey) -> Error {
        Error::ObjectNotFound {
            object_type: self.object_schema(table).name().to_string(),
            key,
        }
    }

    fn link_exists(&self, target: &str, key: ObjKey) -> Result<bool> {
        let table = self.table_id(target)?;
        Ok(self.tables[table.index()].contains(key))
    }

    /// Checks that every link in `value` points at an existing object.
    fn check_links(&self, kind: &PropertyKind, value: &Value) -> Result<()> {
        let Some(target) = kind.link_target() else {
            return Ok(());
        };
        for key in value.links() {
            if !self.link_exists(target, key)? {
                return Err(Error::ObjectNotFound {
                    object_type: target.to_string(),
                    key,
                });
            }
        }
        Ok(())
    }

    /// Creates an object, filling unspecified properties with defaults.
    ///
    /// # Errors
    ///
    /// `Schema` for unknown types, unknown properties or mistyped values;
    /// `ObjectNotFound` for links to missing objects.
    pub fn create_object<'a, I>(&mut self, object_type: &str, values: I) -> Result<ObjKey>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let table = self.table_id(object_type)?;
        let object_schema = self.object_schema(table).clone();
        let mut row = object_schema.default_row();
        for (name, value) in values {
            let (slot, property) = object_schema.stored_property(name)?;
            validate_value(&object_schema, property, &value)?;
            self.check_links(&property.kind, &value)?;
            row[slot] = value;
        }

        let table_mut = self.table_mut(table);
        let key = table_mut.allocate_key();
        table_mut.insert(key, ObjectData::new(row));
        Ok(key)
    }

    /// Returns true if the object exists in this transaction's view.
    pub fn contains(&self, object_type: &str, key: ObjKey) -> Result<bool> {
        let table = self.table_id(object_type)?;
        Ok(self.tables[table.index()].contains(key))
    }

    /// Keys of every object of a type, ascending
    pub fn keys(&self, object_type: &str) -> Result<Vec<ObjKey>> {
        let table = self.table_id(object_type)?;
        Ok(self.tables[table.index()].keys().collect())
    }

    /// Reads a stored property, including uncommitted changes.
    pub fn get(&self, object_type: &str, key: ObjKey, property: &str) -> Result<Value> {
        let table = self.table_id(object_type)?;
        let (slot, _) = self.object_schema(table).stored_property(property)?;
        let data = self.tables[table.index()]
            .get(key)
            .ok_or_else(|| self.not_found(table, key))?;
        Ok(data.get(slot).clone())
    }

    /// Sets a stored property.
    pub fn set(
        &mut self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        let table = self.table_id(object_type)?;
        let object_schema = self.object_schema(table).clone();
        let (slot, prop) = object_schema.stored_property(property)?;
        validate_value(&object_schema, prop, &value)?;
        self.check_links(&prop.kind, &value)?;

        let not_found = self.not_found(table, key);
        let data = self.table_mut(table).get_mut(key).ok_or(not_found)?;
        data.set(slot, value);
        Ok(())
    }

    /// Deletes an object and removes every link to it.
    ///
    /// To-one links become null; the object is removed from every list,
    /// set and dictionary that held it.
    pub fn delete_object(&mut self, object_type: &str, key: ObjKey) -> Result<()> {
        let table = self.table_id(object_type)?;
        if !self.table_mut(table).remove(key) {
            return Err(self.not_found(table, key));
        }

        let schema = Arc::clone(self.store.schema());
        for (index, origin) in schema.object_schemas().iter().enumerate() {
            let origin_table = TableId::new(index as u32);
            let slots: Vec<usize> = origin
                .stored_properties()
                .filter(|(_, p)| p.kind.link_target() == Some(object_type))
                .map(|(slot, _)| slot)
                .collect();
            if slots.is_empty() {
                continue;
            }

            let referencing: Vec<ObjKey> = self.tables[index]
                .iter()
                .filter(|(_, data)| slots.iter().any(|&s| data.get(s).links_to(key)))
                .map(|(k, _)| k)
                .collect();

            let table_mut = self.table_mut(origin_table);
            for origin_key in referencing {
                let Some(data) = table_mut.get_mut(origin_key) else {
                    continue;
                };
                for &slot in &slots {
                    unlink(data.get_mut(slot), key);
                }
            }
        }
        Ok(())
    }

    /// Resolves a collection property and checks its kind and target.
    fn collection_slot(
        &self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        target: Option<ObjKey>,
    ) -> Result<(TableId, usize, PropertyKind)> {
        let table = self.table_id(object_type)?;
        let (slot, prop) = self.object_schema(table).stored_property(property)?;
        if !prop.kind.is_collection() {
            return Err(Error::schema(format!(
                "Property '{}.{}' is not a collection",
                object_type, property
            )));
        }
        if !self.tables[table.index()].contains(key) {
            return Err(self.not_found(table, key));
        }
        if let Some(target) = target {
            self.check_links(&prop.kind, &Value::Link(target))?;
        }
        Ok((table, slot, prop.kind.clone()))
    }

    fn collection_mut(&mut self, table: TableId, key: ObjKey, slot: usize) -> Result<&mut Value> {
        let not_found = self.not_found(table, key);
        self.table_mut(table)
            .get_mut(key)
            .map(|data| data.get_mut(slot))
            .ok_or(not_found)
    }

    /// Appends a link to a list property.
    pub fn list_push(
        &mut self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        target: ObjKey,
    ) -> Result<()> {
        let (table, slot, kind) = self.collection_slot(object_type, key, property, Some(target))?;
        expect_kind(&kind, "list", object_type, property)?;
        if let Value::List(list) = self.collection_mut(table, key, slot)? {
            list.push(target);
        }
        Ok(())
    }

    /// Inserts a link into a list property at `index`.
    pub fn list_insert(
        &mut self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        index: usize,
        target: ObjKey,
    ) -> Result<()> {
        let (table, slot, kind) = self.collection_slot(object_type, key, property, Some(target))?;
        expect_kind(&kind, "list", object_type, property)?;
        if let Value::List(list) = self.collection_mut(table, key, slot)? {
            if index > list.len() {
                return Err(Error::IndexOutOfBounds {
                    index,
                    len: list.len(),
                });
            }
            list.insert(index, target);
        }
        Ok(())
    }

    /// Removes the link at `index` from a list property.
    pub fn list_remove(
        &mut self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        index: usize,
    ) -> Result<ObjKey> {
        let (table, slot, kind) = self.collection_slot(object_type, key, property, None)?;
        expect_kind(&kind, "list", object_type, property)?;
        match self.collection_mut(table, key, slot)? {
            Value::List(list) if index < list.len() => Ok(list.remove(index)),
            Value::List(list) => Err(Error::IndexOutOfBounds {
                index,
                len: list.len(),
            }),
            _ => Err(Error::schema("list slot holds a non-list value")),
        }
    }

    /// Moves a list entry from `from` to `to`.
    pub fn list_move(
        &mut self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        from: usize,
        to: usize,
    ) -> Result<()> {
        let (table, slot, kind) = self.collection_slot(object_type, key, property, None)?;
        expect_kind(&kind, "list", object_type, property)?;
        if let Value::List(list) = self.collection_mut(table, key, slot)? {
            let len = list.len();
            for index in [from, to] {
                if index >= len {
                    return Err(Error::IndexOutOfBounds { index, len });
                }
            }
            let item = list.remove(from);
            list.insert(to, item);
        }
        Ok(())
    }

    /// Adds a link to a set property. Returns false if already present.
    pub fn set_insert(
        &mut self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        target: ObjKey,
    ) -> Result<bool> {
        let (table, slot, kind) = self.collection_slot(object_type, key, property, Some(target))?;
        expect_kind(&kind, "set", object_type, property)?;
        match self.collection_mut(table, key, slot)? {
            Value::Set(set) => Ok(set.insert(target)),
            _ => Ok(false),
        }
    }

    /// Removes a link from a set property. Returns false if absent.
    pub fn set_remove(
        &mut self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        target: ObjKey,
    ) -> Result<bool> {
        let (table, slot, kind) = self.collection_slot(object_type, key, property, None)?;
        expect_kind(&kind, "set", object_type, property)?;
        match self.collection_mut(table, key, slot)? {
            Value::Set(set) => Ok(set.remove(&target)),
            _ => Ok(false),
        }
    }

    /// Inserts or replaces a dictionary entry. Returns the previous link.
    pub fn dictionary_insert(
        &mut self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        entry: impl Into<String>,
        target: ObjKey,
    ) -> Result<Option<ObjKey>> {
        let (table, slot, kind) = self.collection_slot(object_type, key, property, Some(target))?;
        expect_kind(&kind, "dictionary", object_type, property)?;
        match self.collection_mut(table, key, slot)? {
            Value::Dictionary(map) => Ok(map.insert(entry.into(), target)),
            _ => Ok(None),
        }
    }

    /// Removes a dictionary entry. Returns the removed link.
    pub fn dictionary_remove(
        &mut self,
        object_type: &str,
        key: ObjKey,
        property: &str,
        entry: &str,
    ) -> Result<Option<ObjKey>> {
        let (table, slot, kind) = self.collection_slot(object_type, key, property, None)?;
        expect_kind(&kind, "dictionary", object_type, property)?;
        match self.collection_mut(table, key, slot)? {
            Value::Dictionary(map) => Ok(map.remove(entry)),
            _ => Ok(None),
        }
    }

    /// Publishes the transaction as a new snapshot.
    pub fn commit(self) -> SnapshotVersion {
        self.commit_and_pin().version()
    }

    /// Publishes the transaction and pins the new snapshot for reading.
    ///
    /// The pin is taken before any other writer can publish, so the
    /// caller observes exactly its own commit.
    pub fn commit_and_pin(mut self) -> SnapshotPin {
        self.finished = true;
        let tables = std::mem::take(&mut self.tables);
        self.store.publish(self.base.version(), tables)
    }

    /// Discards all changes.
    pub fn cancel(mut self) {
        self.abandon();
    }

    fn abandon(&mut self) {
        if !self.finished {
            self.finished = true;
            self.store.release_writer();
            log_event(Event::WriteCancelled, &[("path", self.store.path())]);
        }
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        self.abandon();
    }
}

fn expect_kind(kind: &PropertyKind, expected: &str, object_type: &str, property: &str) -> Result<()> {
    if kind.type_name() == expected {
        Ok(())
    } else {
        Err(Error::schema(format!(
            "Property '{}.{}' is a {}, not a {}",
            object_type,
            property,
            kind.type_name(),
            expected
        )))
    }
}

/// Removes every reference to `key` from a stored value.
fn unlink(value: &mut Value, key: ObjKey) {
    match value {
        Value::Link(k) if *k == key => *value = Value::Null,
        Value::List(list) => list.retain(|k| *k != key),
        Value::Set(set) => {
            set.remove(&key);
        }
        Value::Dictionary(map) => map.retain(|_, k| *k != key),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::observability::MetricsRegistry;
    use crate::schema::{ObjectSchema, Property, Schema};

    fn store() -> VersionedStore {
        let schema = Schema::new(vec![
            ObjectSchema::new(
                "Person",
                vec![
                    Property::string("name"),
                    Property::int("age"),
                    Property::object("best_friend", "Person"),
                    Property::list("dogs", "Dog"),
                    Property::set("favorites", "Dog"),
                    Property::dictionary("nicknames", "Dog"),
                ],
            ),
            ObjectSchema::new("Dog", vec![Property::string("name")]),
        ])
        .unwrap();
        VersionedStore::new(
            "write.realm",
            schema,
            StoreConfig::default(),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[test]
    fn test_create_and_read_back() {
        let store = store();
        let mut tx = store.begin_write().unwrap();
        let alice = tx
            .create_object("Person", [("name", "Alice".into()), ("age", 30.into())])
            .unwrap();
        assert_eq!(tx.get("Person", alice, "age").unwrap(), Value::Int(30));
        assert_eq!(
            tx.get("Person", alice, "best_friend").unwrap(),
            Value::Null
        );
        tx.commit();

        let snapshot = store.latest();
        let table = store.schema().table_id("Person").unwrap();
        assert_eq!(
            snapshot.value(table, alice, "name").unwrap(),
            &Value::from("Alice")
        );
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let store = store();
        let mut tx = store.begin_write().unwrap();
        let err = tx
            .create_object("Person", [("age", "thirty".into())])
            .unwrap_err();
        assert_eq!(err.code(), "LIVE_SCHEMA_INVALID");
    }

    #[test]
    fn test_link_to_missing_object_rejected() {
        let store = store();
        let mut tx = store.begin_write().unwrap();
        let alice = tx.create_object("Person", []).unwrap();
        let err = tx
            .list_push("Person", alice, "dogs", ObjKey::new(99))
            .unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound { .. }));
    }

    #[test]
    fn test_cancel_discards_changes() {
        let store = store();
        let mut tx = store.begin_write().unwrap();
        tx.create_object("Dog", [("name", "Rex".into())]).unwrap();
        tx.cancel();

        assert_eq!(store.current_version(), SnapshotVersion::INITIAL);
        let dogs = store.schema().table_id("Dog").unwrap();
        assert!(store.latest().table(dogs).is_empty());
    }

    #[test]
    fn test_drop_releases_write_lock() {
        let store = store();
        {
            let _tx = store.begin_write().unwrap();
            assert!(store.is_write_locked());
        }
        assert!(!store.is_write_locked());
    }

    #[test]
    fn test_list_operations() {
        let store = store();
        let mut tx = store.begin_write().unwrap();
        let alice = tx.create_object("Person", []).unwrap();
        let a = tx.create_object("Dog", [("name", "a".into())]).unwrap();
        let b = tx.create_object("Dog", [("name", "b".into())]).unwrap();

        tx.list_push("Person", alice, "dogs", a).unwrap();
        tx.list_push("Person", alice, "dogs", b).unwrap();
        tx.list_insert("Person", alice, "dogs", 0, b).unwrap();
        assert_eq!(
            tx.get("Person", alice, "dogs").unwrap(),
            Value::List(vec![b, a, b])
        );

        tx.list_move("Person", alice, "dogs", 0, 2).unwrap();
        assert_eq!(
            tx.get("Person", alice, "dogs").unwrap(),
            Value::List(vec![a, b, b])
        );

        assert_eq!(tx.list_remove("Person", alice, "dogs", 1).unwrap(), b);
        assert!(matches!(
            tx.list_remove("Person", alice, "dogs", 5),
            Err(Error::IndexOutOfBounds { index: 5, len: 2 })
        ));
        assert!(tx.set_insert("Person", alice, "dogs", a).is_err());
    }

    #[test]
    fn test_delete_cascades_to_links() {
        let store = store();
        let mut tx = store.begin_write().unwrap();
        let alice = tx.create_object("Person", []).unwrap();
        let bob = tx.create_object("Person", []).unwrap();
        let rex = tx.create_object("Dog", []).unwrap();
        let fido = tx.create_object("Dog", []).unwrap();

        tx.set("Person", alice, "best_friend", bob).unwrap();
        tx.list_push("Person", alice, "dogs", rex).unwrap();
        tx.list_push("Person", alice, "dogs", fido).unwrap();
        tx.list_push("Person", alice, "dogs", rex).unwrap();
        tx.set_insert("Person", alice, "favorites", rex).unwrap();
        tx.dictionary_insert("Person", alice, "nicknames", "good boy", rex)
            .unwrap();
        tx.commit();

        let mut tx = store.begin_write().unwrap();
        tx.delete_object("Dog", rex).unwrap();
        tx.delete_object("Person", bob).unwrap();
        assert_eq!(
            tx.get("Person", alice, "dogs").unwrap(),
            Value::List(vec![fido])
        );
        assert_eq!(
            tx.get("Person", alice, "favorites").unwrap(),
            Value::Set(Default::default())
        );
        assert_eq!(
            tx.get("Person", alice, "nicknames").unwrap(),
            Value::Dictionary(Default::default())
        );
        assert_eq!(
            tx.get("Person", alice, "best_friend").unwrap(),
            Value::Null
        );
        assert!(tx.delete_object("Dog", rex).is_err());
    }

    #[test]
    fn test_untouched_tables_are_shared() {
        let store = store();
        let mut tx = store.begin_write().unwrap();
        tx.create_object("Dog", []).unwrap();
        tx.commit();
        let before = store.latest();

        let mut tx = store.begin_write().unwrap();
        tx.create_object("Person", []).unwrap();
        tx.commit();
        let after = store.latest();

        let dogs = store.schema().table_id("Dog").unwrap();
        assert!(Arc::ptr_eq(
            &before.tables()[dogs.index()],
            &after.tables()[dogs.index()]
        ));
    }
}

//! Immutable snapshots
//!
//! A snapshot is the complete committed state at one version. Tables and
//! rows are reference counted, so a commit shares every table and row it
//! did not touch with the snapshot it was derived from.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::SnapshotVersion;
use crate::error::{Error, Result};
use crate::schema::{ObjKey, Schema, TableId, Value};

/// Stored values of one object, indexed by slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectData {
    values: Vec<Value>,
}

impl ObjectData {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Value at `slot`
    ///
    /// Slots come from the object type's schema, so they are in range.
    #[inline]
    pub fn get(&self, slot: usize) -> &Value {
        &self.values[slot]
    }

    pub(crate) fn set(&mut self, slot: usize, value: Value) {
        self.values[slot] = value;
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> &mut Value {
        &mut self.values[slot]
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Rows of one object type, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct Table {
    objects: BTreeMap<ObjKey, Arc<ObjectData>>,
    next_key: u64,
}

impl Table {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, key: ObjKey) -> bool {
        self.objects.contains_key(&key)
    }

    pub fn get(&self, key: ObjKey) -> Option<&ObjectData> {
        self.objects.get(&key).map(|o| o.as_ref())
    }

    /// Returns true if both tables hold the same allocation for `key`.
    ///
    /// Rows untouched by a commit are shared, so pointer equality proves
    /// the row did not change.
    pub(crate) fn shares_row(&self, other: &Table, key: ObjKey) -> bool {
        match (self.objects.get(&key), other.objects.get(&key)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Keys in ascending (insertion) order
    pub fn keys(&self) -> impl Iterator<Item = ObjKey> + '_ {
        self.objects.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjKey, &ObjectData)> + '_ {
        self.objects.iter().map(|(k, v)| (*k, v.as_ref()))
    }

    pub(crate) fn allocate_key(&mut self) -> ObjKey {
        let key = ObjKey::new(self.next_key);
        self.next_key += 1;
        key
    }

    pub(crate) fn insert(&mut self, key: ObjKey, data: ObjectData) {
        self.objects.insert(key, Arc::new(data));
    }

    pub(crate) fn remove(&mut self, key: ObjKey) -> bool {
        self.objects.remove(&key).is_some()
    }

    /// Copy-on-write access to a row
    pub(crate) fn get_mut(&mut self, key: ObjKey) -> Option<&mut ObjectData> {
        self.objects.get_mut(&key).map(Arc::make_mut)
    }
}

/// Committed state of the whole store at one version.
#[derive(Debug)]
pub struct Snapshot {
    version: SnapshotVersion,
    committed_at: DateTime<Utc>,
    schema: Arc<Schema>,
    tables: Vec<Arc<Table>>,
}

impl Snapshot {
    /// The empty snapshot every store starts from
    pub(crate) fn empty(schema: Arc<Schema>) -> Self {
        let tables = (0..schema.len()).map(|_| Arc::new(Table::default())).collect();
        Self {
            version: SnapshotVersion::INITIAL,
            committed_at: Utc::now(),
            schema,
            tables,
        }
    }

    pub(crate) fn new(version: SnapshotVersion, schema: Arc<Schema>, tables: Vec<Arc<Table>>) -> Self {
        Self {
            version,
            committed_at: Utc::now(),
            schema,
            tables,
        }
    }

    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub(crate) fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    /// Table for `table`
    pub fn table(&self, table: TableId) -> &Table {
        &self.tables[table.index()]
    }

    /// Looks up an object
    pub fn object(&self, table: TableId, key: ObjKey) -> Option<&ObjectData> {
        self.table(table).get(key)
    }

    /// Reads a stored property of an object.
    ///
    /// # Errors
    ///
    /// `ObjectNotFound` if the object does not exist at this version, and
    /// `Schema` if the property is unknown or computed.
    pub fn value(&self, table: TableId, key: ObjKey, property: &str) -> Result<&Value> {
        let object_schema = self.schema.object_schema(table);
        let (slot, _) = object_schema.stored_property(property)?;
        let data = self.object(table, key).ok_or_else(|| Error::ObjectNotFound {
            object_type: object_schema.name().to_string(),
            key,
        })?;
        Ok(data.get(slot))
    }
}

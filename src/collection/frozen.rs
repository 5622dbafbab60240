//! Frozen collections
//!
//! A `FrozenCollection` is the value delivered with every notification:
//! the collection's rows as of one snapshot, readable from any thread for
//! as long as it is held.

use std::fmt;
use std::sync::Arc;

use super::materialize::backlinks;
use crate::error::{Error, Result};
use crate::mvcc::{Snapshot, SnapshotVersion};
use crate::schema::{ObjKey, PropertyKind, TableId, Value};

/// An immutable view of a collection at one version.
#[derive(Clone)]
pub struct FrozenCollection {
    snapshot: Arc<Snapshot>,
    table: TableId,
    rows: Arc<[ObjKey]>,
}

impl FrozenCollection {
    pub(crate) fn new(snapshot: Arc<Snapshot>, table: TableId, rows: Vec<ObjKey>) -> Self {
        Self {
            snapshot,
            table,
            rows: rows.into(),
        }
    }

    /// Version the rows were evaluated at
    pub fn version(&self) -> SnapshotVersion {
        self.snapshot.version()
    }

    pub fn object_type(&self) -> &str {
        self.snapshot.schema().object_schema(self.table).name()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row identities in collection order
    pub fn keys(&self) -> &[ObjKey] {
        &self.rows
    }

    /// Object at `index`
    pub fn get(&self, index: usize) -> Result<ObjectRef> {
        let key = *self.rows.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            len: self.rows.len(),
        })?;
        Ok(ObjectRef::new(Arc::clone(&self.snapshot), self.table, key))
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.rows
            .iter()
            .map(move |key| ObjectRef::new(Arc::clone(&self.snapshot), self.table, *key))
    }

    /// One property of every row, in collection order
    pub fn values(&self, property: &str) -> Result<Vec<Value>> {
        self.iter().map(|object| object.get(property)).collect()
    }
}

impl fmt::Debug for FrozenCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrozenCollection")
            .field("object_type", &self.object_type())
            .field("version", &self.version())
            .field("rows", &self.rows)
            .finish()
    }
}

/// A reference to one object at one version.
#[derive(Clone)]
pub struct ObjectRef {
    snapshot: Arc<Snapshot>,
    table: TableId,
    key: ObjKey,
}

impl ObjectRef {
    pub(crate) fn new(snapshot: Arc<Snapshot>, table: TableId, key: ObjKey) -> Self {
        Self {
            snapshot,
            table,
            key,
        }
    }

    pub fn key(&self) -> ObjKey {
        self.key
    }

    pub fn object_type(&self) -> &str {
        self.snapshot.schema().object_schema(self.table).name()
    }

    pub fn version(&self) -> SnapshotVersion {
        self.snapshot.version()
    }

    /// Returns true if the object exists at this version.
    pub fn is_valid(&self) -> bool {
        self.snapshot.object(self.table, self.key).is_some()
    }

    /// Reads a property by name.
    ///
    /// Linking-objects properties are computed and returned as a list of
    /// origin keys.
    pub fn get(&self, property: &str) -> Result<Value> {
        let object_schema = self.snapshot.schema().object_schema(self.table);
        if let Some(PropertyKind::LinkingObjects { origin, property }) =
            object_schema.property(property).map(|p| &p.kind)
        {
            if !self.is_valid() {
                return Err(Error::ObjectNotFound {
                    object_type: object_schema.name().to_string(),
                    key: self.key,
                });
            }
            let origin = self.snapshot.schema().require_table(origin)?;
            return Ok(Value::List(backlinks(
                &self.snapshot,
                origin,
                property,
                self.key,
            )));
        }
        self.snapshot
            .value(self.table, self.key, property)
            .map(Value::clone)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("object_type", &self.object_type())
            .field("key", &self.key)
            .field("version", &self.version())
            .finish()
    }
}

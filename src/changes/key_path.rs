//! Key paths limiting which properties count as a change
//!
//! A key path is a dotted chain of stored property names starting at one
//! object type, such as `dogs.name`. Every segment but the last must be a
//! link (object, list, set or dictionary) so the next segment can be
//! resolved on its target type.

use crate::error::{Error, Result};
use crate::mvcc::Snapshot;
use crate::schema::{ObjKey, Schema, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Step {
    slot: usize,
    /// Table the slot links to, when it is a link
    target: Option<TableId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyPath {
    text: String,
    steps: Vec<Step>,
}

/// A resolved set of key paths rooted at one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPaths {
    table: TableId,
    paths: Vec<KeyPath>,
}

impl KeyPaths {
    /// Resolves dotted key paths against `table`.
    ///
    /// # Errors
    ///
    /// A schema error naming the first segment that does not exist, is
    /// computed, or is followed by another segment without being a link.
    pub fn resolve<S: AsRef<str>>(schema: &Schema, table: TableId, key_paths: &[S]) -> Result<Self> {
        let paths = key_paths
            .iter()
            .map(|path| resolve_path(schema, table, path.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { table, paths })
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    /// The key paths as given
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(|p| p.text.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Returns true if any observed path starting at `slot` differs for
    /// `key` between the two snapshots.
    pub(crate) fn slot_changed(&self, old: &Snapshot, new: &Snapshot, key: ObjKey, slot: usize) -> bool {
        self.paths
            .iter()
            .filter(|p| p.steps.first().map(|s| s.slot) == Some(slot))
            .any(|p| path_changed(old, new, self.table, key, &p.steps))
    }

    /// Returns true if any observed path differs for `key`.
    pub(crate) fn object_changed(&self, old: &Snapshot, new: &Snapshot, key: ObjKey) -> bool {
        self.paths
            .iter()
            .any(|p| path_changed(old, new, self.table, key, &p.steps))
    }

    /// Returns true if some path starts at `slot`.
    pub(crate) fn observes_slot(&self, slot: usize) -> bool {
        self.paths
            .iter()
            .any(|p| p.steps.first().map(|s| s.slot) == Some(slot))
    }
}

fn resolve_path(schema: &Schema, root: TableId, text: &str) -> Result<KeyPath> {
    let mut steps = Vec::new();
    let mut table = Some(root);
    for segment in text.split('.') {
        let current = table.ok_or_else(|| {
            Error::schema(format!("Key path '{}' continues past a non-link property", text))
        })?;
        let object_schema = schema.object_schema(current);
        let property = object_schema.property(segment).ok_or_else(|| {
            Error::schema(format!(
                "Property '{}' not found in object of type '{}'",
                segment,
                object_schema.name()
            ))
        })?;
        let slot = object_schema.slot(segment).ok_or_else(|| {
            Error::schema(format!(
                "Property '{}.{}' is computed and cannot be observed by key path",
                object_schema.name(),
                property.name
            ))
        })?;
        let target = property
            .kind
            .link_target()
            .and_then(|target| schema.table_id(target));
        steps.push(Step { slot, target });
        table = target;
    }
    Ok(KeyPath {
        text: text.to_string(),
        steps,
    })
}

/// Follows `steps` from `key` in both snapshots. A path changed when the
/// stored value at any step differs, or when an object reached through a
/// link changed further down the path.
fn path_changed(old: &Snapshot, new: &Snapshot, table: TableId, key: ObjKey, steps: &[Step]) -> bool {
    let Some((step, rest)) = steps.split_first() else {
        return false;
    };
    let (old_row, new_row) = match (old.object(table, key), new.object(table, key)) {
        (Some(o), Some(n)) => (o, n),
        (None, None) => return false,
        _ => return true,
    };
    let value = new_row.get(step.slot);
    if old_row.get(step.slot) != value {
        return true;
    }
    match step.target {
        Some(target) if !rest.is_empty() => value
            .links()
            .into_iter()
            .any(|linked| path_changed(old, new, target, linked, rest)),
        _ => false,
    }
}

//! Change sets and notification payloads

use serde::{Deserialize, Serialize};

use super::IndexSet;
use crate::collection::{FrozenCollection, ObjectRef};
use crate::error::Error;
use crate::schema::Value;

/// A row that changed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    /// Position in the old collection
    pub from: usize,
    /// Position in the new collection
    pub to: usize,
}

/// Differences between two observations of one collection.
///
/// `deletions` are positions in the old collection; `insertions` and
/// `modifications` are positions in the new one. Every move also appears
/// as a deletion at `from` and an insertion at `to`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionChangeSet {
    pub deletions: IndexSet,
    pub insertions: IndexSet,
    pub modifications: IndexSet,
    pub moves: Vec<Move>,
}

impl CollectionChangeSet {
    /// True when nothing was deleted, inserted or modified.
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.insertions.is_empty() && self.modifications.is_empty()
    }

    /// Replays the change set: removes `deletions` from `previous`, then
    /// inserts `current[i]` at every `i` in `insertions`, ascending.
    ///
    /// For a change set computed from `previous` to `current`, the result
    /// equals `current`.
    pub fn apply<T: Clone>(&self, previous: &[T], current: &[T]) -> Vec<T> {
        let mut result: Vec<T> = previous
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.deletions.contains(*i))
            .map(|(_, item)| item.clone())
            .collect();
        for index in self.insertions.iter() {
            if let Some(item) = current.get(index) {
                let at = index.min(result.len());
                result.insert(at, item.clone());
            }
        }
        result
    }
}

/// A notification delivered to a collection observer.
#[derive(Debug, Clone)]
pub enum CollectionChange {
    /// First delivery: the full collection
    Initial(FrozenCollection),
    /// Subsequent delivery: the new collection and what changed
    Update {
        collection: FrozenCollection,
        changes: CollectionChangeSet,
    },
    /// Evaluation failed; no further deliveries follow
    Error(Error),
}

impl CollectionChange {
    /// The delivered collection, if any
    pub fn collection(&self) -> Option<&FrozenCollection> {
        match self {
            CollectionChange::Initial(collection) => Some(collection),
            CollectionChange::Update { collection, .. } => Some(collection),
            CollectionChange::Error(_) => None,
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, CollectionChange::Initial(_))
    }
}

/// One changed property of an observed object.
///
/// `old_value` and `new_value` are set when the stored value itself
/// changed. A change found only further down a link (for example through
/// the key path `dog.name`) reports the top-level property with both unset.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// A notification delivered to an object observer.
#[derive(Debug, Clone)]
pub enum ObjectChange {
    /// Some observed properties changed
    Change {
        object: ObjectRef,
        properties: Vec<PropertyChange>,
    },
    /// The object was deleted; no further deliveries follow
    Deleted,
    /// Evaluation failed; no further deliveries follow
    Error(Error),
}

impl ObjectChange {
    /// Names of the changed properties, empty unless this is a `Change`
    pub fn property_names(&self) -> Vec<&str> {
        match self {
            ObjectChange::Change { properties, .. } => {
                properties.iter().map(|p| p.name.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

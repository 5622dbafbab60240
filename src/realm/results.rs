//! Results - the live collection type
//!
//! A `Results` is a realm plus a `CollectionSpec`. It holds no rows:
//! every read evaluates that `CollectionSpec` at the realm's current read version, so
//! the collection follows the realm as it advances.

use std::fmt;

use super::Realm;
use crate::changes::{CollectionChange, KeyPaths};
use crate::collection::{materialize, CollectionSpec, FrozenCollection, ObjectRef};
use crate::error::Result;
use crate::notify::NotificationToken;
use crate::query::{Predicate, SortDescriptor};
use crate::schema::ObjKey;

/// A live, auto-updating collection.
#[derive(Clone)]
pub struct Results {
    realm: Realm,
    spec: CollectionSpec,
}

impl Results {
    pub(crate) fn new(realm: Realm, spec: CollectionSpec) -> Self {
        Self { realm, spec }
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    pub fn object_type(&self) -> &str {
        self.realm.schema().object_schema(self.spec.table_id()).name()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Row identities at the realm's read version
    pub fn keys(&self) -> Result<Vec<ObjKey>> {
        let snapshot = self.realm.read_snapshot()?;
        materialize(&self.spec, &snapshot)
    }

    pub fn get(&self, index: usize) -> Result<ObjectRef> {
        self.snapshot()?.get(index)
    }

    /// Freezes the collection at the realm's read version.
    pub fn snapshot(&self) -> Result<FrozenCollection> {
        let snapshot = self.realm.read_snapshot()?;
        let rows = materialize(&self.spec, &snapshot)?;
        Ok(FrozenCollection::new(snapshot, self.spec.table_id(), rows))
    }

    /// Narrows the collection. Combined with any existing filter.
    pub fn filter(&self, predicate: Predicate) -> Results {
        Results::new(self.realm.clone(), self.spec.clone().filtered(predicate))
    }

    /// Replaces the sort order.
    pub fn sorted(&self, descriptors: Vec<SortDescriptor>) -> Results {
        Results::new(self.realm.clone(), self.spec.clone().sorted(descriptors))
    }

    /// Sorts by one property.
    pub fn sorted_by(&self, property: &str, ascending: bool) -> Results {
        let descriptor = if ascending {
            SortDescriptor::asc(property)
        } else {
            SortDescriptor::desc(property)
        };
        self.sorted(vec![descriptor])
    }

    /// Observes the collection.
    ///
    /// The first delivery is always `Initial`, on the realm's run loop.
    /// Subsequent deliveries are `Update`s carrying the change set since
    /// the previous delivery. The callback is never invoked after the
    /// returned token has been stopped or dropped.
    pub fn observe<F>(&self, callback: F) -> Result<NotificationToken>
    where
        F: FnMut(CollectionChange) + Send + 'static,
    {
        self.realm.add_notifier(self.spec.clone(), None, Box::new(callback))
    }

    /// Like `observe`, but a row only counts as modified when a property
    /// on one of `key_paths` changed. Insertions, deletions and moves are
    /// reported as before. An empty slice observes every property.
    ///
    /// # Errors
    ///
    /// `Schema` if a key path does not resolve against the collection's
    /// object type.
    pub fn observe_key_paths<S, F>(&self, key_paths: &[S], callback: F) -> Result<NotificationToken>
    where
        S: AsRef<str>,
        F: FnMut(CollectionChange) + Send + 'static,
    {
        let key_paths = if key_paths.is_empty() {
            None
        } else {
            Some(KeyPaths::resolve(self.realm.schema(), self.spec.table_id(), key_paths)?)
        };
        self.realm.add_notifier(self.spec.clone(), key_paths, Box::new(callback))
    }
}

impl fmt::Debug for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("realm", &self.realm)
            .field("spec", &self.spec)
            .finish()
    }
}

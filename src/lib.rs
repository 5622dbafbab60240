//! livestore - live collections over a versioned object store
//!
//! Readers see immutable snapshots; every commit publishes a new one.
//! Collections observed through a realm are re-evaluated after each
//! commit and their observers receive positional change sets on the
//! realm's run loop.

pub mod changes;
pub mod collection;
pub mod config;
pub mod error;
pub mod mvcc;
pub mod notify;
pub mod observability;
pub mod query;
pub mod realm;
pub mod schema;

pub use changes::{
    ChangeComputer, CollectionChange, CollectionChangeSet, IndexSet, KeyPaths, Move, ObjectChange,
    PropertyChange,
};
pub use collection::{CollectionSpec, FrozenCollection, ObjectRef};
pub use config::{RealmConfig, StoreConfig};
pub use error::{Error, Result, UsageError};
pub use mvcc::{ReadTransaction, SnapshotVersion, VersionedStore, WriteTransaction};
pub use notify::{NotificationToken, RunLoop};
pub use query::{FilterOp, Predicate, SortDescriptor};
pub use realm::{Environment, Realm, RealmEvent, RealmTransaction, Results};
pub use schema::{ObjKey, ObjectSchema, Property, PropertyKind, Schema, Value};

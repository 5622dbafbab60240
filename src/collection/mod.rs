//! Live collection identities and their evaluation
//!
//! - `CollectionSpec` - What a collection is (source, filter, sort)
//! - `materialize` - What it holds at one snapshot
//! - `FrozenCollection` / `ObjectRef` - Delivered, immutable views

mod frozen;
mod materialize;
mod spec;

pub use frozen::{FrozenCollection, ObjectRef};
pub use materialize::materialize;
pub use spec::{CollectionSource, CollectionSpec};

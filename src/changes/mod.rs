//! Change computation
//!
//! Turns two observations of a collection into the positional change set
//! delivered to observers, and two observations of one object into the
//! list of its changed properties.

mod change_set;
mod computer;
mod index_set;
mod key_path;

pub use change_set::{CollectionChange, CollectionChangeSet, Move, ObjectChange, PropertyChange};
pub use computer::{ChangeComputer, MAX_LINK_DEPTH};
pub use index_set::IndexSet;
pub use key_path::KeyPaths;

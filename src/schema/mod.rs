//! Schema subsystem for livestore
//!
//! Object types are plain descriptors: a name, an ordered property list,
//! and a name-to-slot lookup table. Rows are `Vec<Value>` indexed by slot,
//! so registering a new object type never requires a new Rust type.
//!
//! # Design Principles
//!
//! - Validated once when built, immutable afterwards
//! - Values are type-checked on every write
//! - No implicit coercion

mod types;
pub(crate) mod validator;
mod value;

pub use types::{ObjectSchema, Property, PropertyKind, Schema, TableId};
pub use value::{ObjKey, Value};

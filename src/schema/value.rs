//! Dynamic property values
//!
//! Objects are read and written by property name through the schema, and
//! every stored slot holds one `Value`. Links are stored as row identities
//! of the target table, never as pointers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable row identity within a table.
///
/// Keys are allocated monotonically and never reused, so ascending key
/// order is insertion order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ObjKey(u64);

impl ObjKey {
    /// Creates a key from its raw value.
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// Absent value of an optional property
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Point in time
    Timestamp(DateTime<Utc>),
    /// To-one link
    Link(ObjKey),
    /// Ordered to-many links, duplicates allowed
    List(Vec<ObjKey>),
    /// Unordered unique to-many links
    Set(BTreeSet<ObjKey>),
    /// String-keyed to-many links
    Dictionary(BTreeMap<String, ObjKey>),
}

impl Value {
    /// Returns true for `Null`.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<ObjKey> {
        match self {
            Value::Link(k) => Some(*k),
            _ => None,
        }
    }

    /// Every link held by this value, in storage order.
    pub fn links(&self) -> Vec<ObjKey> {
        match self {
            Value::Link(k) => vec![*k],
            Value::List(keys) => keys.clone(),
            Value::Set(keys) => keys.iter().copied().collect(),
            Value::Dictionary(map) => map.values().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Returns true if this value links to `key`.
    pub fn links_to(&self, key: ObjKey) -> bool {
        match self {
            Value::Link(k) => *k == key,
            Value::List(keys) => keys.contains(&key),
            Value::Set(keys) => keys.contains(&key),
            Value::Dictionary(map) => map.values().any(|k| *k == key),
            _ => false,
        }
    }

    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Link(_) => "link",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Dictionary(_) => "dictionary",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<ObjKey> for Value {
    fn from(v: ObjKey) -> Self {
        Value::Link(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

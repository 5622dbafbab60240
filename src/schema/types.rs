//! Schema type definitions
//!
//! An object type is a name plus an ordered list of properties. Stored
//! properties own a slot in every row of the type's table; computed
//! properties (linking objects) have no slot and are derived on read.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::validator;
use super::value::Value;
use crate::error::{Error, Result};

/// Index of an object type within its schema.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TableId(u32);

impl TableId {
    #[inline]
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// Supported property kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyKind {
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Double,
    /// UTF-8 string
    String,
    /// Point in time
    Timestamp,
    /// To-one link, always nullable
    Object {
        /// Target object type
        target: String,
    },
    /// Ordered to-many links
    List {
        /// Element object type
        target: String,
    },
    /// Unique to-many links
    Set {
        /// Element object type
        target: String,
    },
    /// String-keyed to-many links
    Dictionary {
        /// Value object type
        target: String,
    },
    /// Computed backlinks: every `origin` object whose `property` links here
    LinkingObjects {
        /// Object type holding the forward link
        origin: String,
        /// Forward link property on `origin`
        property: String,
    },
}

impl PropertyKind {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyKind::Bool => "bool",
            PropertyKind::Int => "int",
            PropertyKind::Double => "double",
            PropertyKind::String => "string",
            PropertyKind::Timestamp => "timestamp",
            PropertyKind::Object { .. } => "object",
            PropertyKind::List { .. } => "list",
            PropertyKind::Set { .. } => "set",
            PropertyKind::Dictionary { .. } => "dictionary",
            PropertyKind::LinkingObjects { .. } => "linking_objects",
        }
    }

    /// Computed properties have no storage slot.
    pub fn is_computed(&self) -> bool {
        matches!(self, PropertyKind::LinkingObjects { .. })
    }

    /// Returns the linked object type, if this kind holds links.
    pub fn link_target(&self) -> Option<&str> {
        match self {
            PropertyKind::Object { target }
            | PropertyKind::List { target }
            | PropertyKind::Set { target }
            | PropertyKind::Dictionary { target } => Some(target),
            _ => None,
        }
    }

    /// Returns true for list, set and dictionary kinds.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            PropertyKind::List { .. } | PropertyKind::Set { .. } | PropertyKind::Dictionary { .. }
        )
    }
}

/// A single property definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Property name, unique within its object type
    pub name: String,
    /// Property kind
    #[serde(flatten)]
    pub kind: PropertyKind,
    /// Whether the property accepts `Value::Null`
    #[serde(default)]
    pub optional: bool,
}

impl Property {
    /// Create a required property of the given kind
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
        }
    }

    /// Marks the property as nullable
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Bool)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Int)
    }

    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Double)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::String)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Timestamp)
    }

    /// Create a to-one link; links are always nullable
    pub fn object(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            PropertyKind::Object {
                target: target.into(),
            },
        )
        .optional()
    }

    pub fn list(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            PropertyKind::List {
                target: target.into(),
            },
        )
    }

    pub fn set(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            PropertyKind::Set {
                target: target.into(),
            },
        )
    }

    pub fn dictionary(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            PropertyKind::Dictionary {
                target: target.into(),
            },
        )
    }

    pub fn linking_objects(
        name: impl Into<String>,
        origin: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            PropertyKind::LinkingObjects {
                origin: origin.into(),
                property: property.into(),
            },
        )
    }

    /// Value a freshly created object holds for this property.
    pub fn default_value(&self) -> Value {
        if self.optional {
            return match self.kind {
                PropertyKind::List { .. } => Value::List(Vec::new()),
                PropertyKind::Set { .. } => Value::Set(Default::default()),
                PropertyKind::Dictionary { .. } => Value::Dictionary(Default::default()),
                _ => Value::Null,
            };
        }
        match self.kind {
            PropertyKind::Bool => Value::Bool(false),
            PropertyKind::Int => Value::Int(0),
            PropertyKind::Double => Value::Double(0.0),
            PropertyKind::String => Value::String(String::new()),
            PropertyKind::Timestamp => Value::Timestamp(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH),
            PropertyKind::Object { .. } | PropertyKind::LinkingObjects { .. } => Value::Null,
            PropertyKind::List { .. } => Value::List(Vec::new()),
            PropertyKind::Set { .. } => Value::Set(Default::default()),
            PropertyKind::Dictionary { .. } => Value::Dictionary(Default::default()),
        }
    }
}

/// Serialized shape of an object type
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectSchemaDef {
    name: String,
    properties: Vec<Property>,
}

/// An object type: name, properties, and a name-to-slot lookup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ObjectSchemaDef", into = "ObjectSchemaDef")]
pub struct ObjectSchema {
    name: String,
    properties: Vec<Property>,
    /// Property name -> position in `properties`
    lookup: HashMap<String, usize>,
    /// Position in `properties` -> storage slot (None for computed)
    slots: Vec<Option<usize>>,
    stored: usize,
}

impl From<ObjectSchemaDef> for ObjectSchema {
    fn from(def: ObjectSchemaDef) -> Self {
        ObjectSchema::new(def.name, def.properties)
    }
}

impl From<ObjectSchema> for ObjectSchemaDef {
    fn from(schema: ObjectSchema) -> Self {
        ObjectSchemaDef {
            name: schema.name,
            properties: schema.properties,
        }
    }
}

impl PartialEq for ObjectSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.properties == other.properties
    }
}

impl ObjectSchema {
    /// Creates an object type and assigns storage slots in declaration order.
    ///
    /// Duplicate property names are rejected later by `Schema::new`.
    pub fn new(name: impl Into<String>, properties: Vec<Property>) -> Self {
        let mut lookup = HashMap::with_capacity(properties.len());
        let mut slots = Vec::with_capacity(properties.len());
        let mut stored = 0;
        for (i, property) in properties.iter().enumerate() {
            lookup.entry(property.name.clone()).or_insert(i);
            if property.kind.is_computed() {
                slots.push(None);
            } else {
                slots.push(Some(stored));
                stored += 1;
            }
        }
        Self {
            name: name.into(),
            properties,
            lookup,
            slots,
            stored,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Looks up a property by name
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.lookup.get(name).map(|&i| &self.properties[i])
    }

    /// Storage slot of a stored property
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).and_then(|&i| self.slots[i])
    }

    /// Resolves a stored property to `(slot, property)` or fails with a schema error.
    pub fn stored_property(&self, name: &str) -> Result<(usize, &Property)> {
        let index = *self.lookup.get(name).ok_or_else(|| {
            Error::schema(format!(
                "Property '{}' does not exist on '{}'",
                name, self.name
            ))
        })?;
        match self.slots[index] {
            Some(slot) => Ok((slot, &self.properties[index])),
            None => Err(Error::schema(format!(
                "Property '{}.{}' is computed and cannot be stored",
                self.name, name
            ))),
        }
    }

    /// Number of storage slots per row
    pub fn stored_count(&self) -> usize {
        self.stored
    }

    /// Stored properties with their slots, in slot order
    pub fn stored_properties(&self) -> impl Iterator<Item = (usize, &Property)> {
        self.properties
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(p, slot)| slot.map(|s| (s, p)))
    }

    /// Default row for a new object
    pub fn default_row(&self) -> Vec<Value> {
        self.stored_properties()
            .map(|(_, p)| p.default_value())
            .collect()
    }
}

/// A validated set of object types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ObjectSchema>", into = "Vec<ObjectSchema>")]
pub struct Schema {
    objects: Vec<ObjectSchema>,
    by_name: HashMap<String, TableId>,
}

impl TryFrom<Vec<ObjectSchema>> for Schema {
    type Error = Error;

    fn try_from(objects: Vec<ObjectSchema>) -> Result<Self> {
        Schema::new(objects)
    }
}

impl From<Schema> for Vec<ObjectSchema> {
    fn from(schema: Schema) -> Self {
        schema.objects
    }
}

impl Schema {
    /// Validates and builds a schema.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` on duplicate names, unknown link targets, or
    /// linking-objects properties that do not name a link on their origin.
    pub fn new(objects: Vec<ObjectSchema>) -> Result<Self> {
        validator::validate_schema(&objects)?;
        let by_name = objects
            .iter()
            .enumerate()
            .map(|(i, o)| (o.name.clone(), TableId::new(i as u32)))
            .collect();
        Ok(Self { objects, by_name })
    }

    /// Resolves an object type name
    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.by_name.get(name).copied()
    }

    /// Resolves an object type name or fails with a schema error
    pub fn require_table(&self, name: &str) -> Result<TableId> {
        self.table_id(name)
            .ok_or_else(|| Error::schema(format!("Object type '{}' is not in the schema", name)))
    }

    /// Object type at `table`
    ///
    /// Table ids are only minted by this schema, so the index is in range.
    pub fn object_schema(&self, table: TableId) -> &ObjectSchema {
        &self.objects[table.index()]
    }

    pub fn object_schemas(&self) -> &[ObjectSchema] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

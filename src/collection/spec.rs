//! Collection specifications
//!
//! A `CollectionSpec` is the identity of a logical live collection: which
//! rows it draws from, an optional filter, and optional sort descriptors.
//! Two specs are equal iff every field matches.

use crate::error::{Error, Result};
use crate::query::{Predicate, SortDescriptor};
use crate::schema::{ObjKey, PropertyKind, Schema, TableId};

/// Where a collection's rows come from
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionSource {
    /// Every object of the element type, in key order
    Table,
    /// A list property of one object, in list order
    List {
        owner: TableId,
        object: ObjKey,
        property: String,
    },
    /// A set property of one object, in key order
    Set {
        owner: TableId,
        object: ObjKey,
        property: String,
    },
    /// A dictionary property of one object, in entry-key order
    Dictionary {
        owner: TableId,
        object: ObjKey,
        property: String,
    },
    /// Every `origin` object whose `property` links to `object`
    LinkingObjects {
        object: ObjKey,
        origin: TableId,
        property: String,
    },
}

/// Identity of a live collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    table: TableId,
    source: CollectionSource,
    filter: Option<Predicate>,
    sort: Vec<SortDescriptor>,
}

impl CollectionSpec {
    /// All objects of a type.
    pub fn table(schema: &Schema, object_type: &str) -> Result<Self> {
        Ok(Self {
            table: schema.require_table(object_type)?,
            source: CollectionSource::Table,
            filter: None,
            sort: Vec::new(),
        })
    }

    /// A list, set or dictionary property of one object.
    ///
    /// # Errors
    ///
    /// `Schema` if the property is not a to-many link property.
    pub fn property(schema: &Schema, object_type: &str, object: ObjKey, property: &str) -> Result<Self> {
        let owner = schema.require_table(object_type)?;
        let prop = schema
            .object_schema(owner)
            .property(property)
            .ok_or_else(|| Error::schema(format!("Property '{}.{}' does not exist", object_type, property)))?;

        let property = property.to_string();
        let (source, target) = match &prop.kind {
            PropertyKind::List { target } => (
                CollectionSource::List {
                    owner,
                    object,
                    property,
                },
                target,
            ),
            PropertyKind::Set { target } => (
                CollectionSource::Set {
                    owner,
                    object,
                    property,
                },
                target,
            ),
            PropertyKind::Dictionary { target } => (
                CollectionSource::Dictionary {
                    owner,
                    object,
                    property,
                },
                target,
            ),
            PropertyKind::LinkingObjects { origin, property } => {
                return Self::backlinks(schema, origin, property, object);
            }
            other => {
                return Err(Error::schema(format!(
                    "Property '{}.{}' is a {}, not a collection",
                    object_type,
                    property,
                    other.type_name()
                )))
            }
        };

        Ok(Self {
            table: schema.require_table(target)?,
            source,
            filter: None,
            sort: Vec::new(),
        })
    }

    /// Every `origin_type` object whose `origin_property` links to `object`.
    pub fn backlinks(schema: &Schema, origin_type: &str, origin_property: &str, object: ObjKey) -> Result<Self> {
        let origin = schema.require_table(origin_type)?;
        let prop = schema
            .object_schema(origin)
            .property(origin_property)
            .ok_or_else(|| {
                Error::schema(format!(
                    "Property '{}.{}' does not exist",
                    origin_type, origin_property
                ))
            })?;
        if prop.kind.link_target().is_none() {
            return Err(Error::schema(format!(
                "Property '{}.{}' is not a link",
                origin_type, origin_property
            )));
        }
        Ok(Self {
            table: origin,
            source: CollectionSource::LinkingObjects {
                object,
                origin,
                property: origin_property.to_string(),
            },
            filter: None,
            sort: Vec::new(),
        })
    }

    /// Adds a filter; combined with any existing filter by conjunction.
    pub fn filtered(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Replaces the sort descriptors.
    pub fn sorted(mut self, descriptors: Vec<SortDescriptor>) -> Self {
        self.sort = descriptors;
        self
    }

    /// Element object type
    pub fn table_id(&self) -> TableId {
        self.table
    }

    pub fn source(&self) -> &CollectionSource {
        &self.source
    }

    pub fn filter(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }

    pub fn sort(&self) -> &[SortDescriptor] {
        &self.sort
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, Property};

    fn schema() -> Schema {
        Schema::new(vec![
            ObjectSchema::new(
                "Person",
                vec![
                    Property::string("name"),
                    Property::list("dogs", "Dog"),
                    Property::set("cats", "Dog"),
                ],
            ),
            ObjectSchema::new(
                "Dog",
                vec![
                    Property::int("age"),
                    Property::linking_objects("owners", "Person", "dogs"),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_equality_covers_every_field() {
        let schema = schema();
        let a = CollectionSpec::table(&schema, "Dog").unwrap();
        let b = CollectionSpec::table(&schema, "Dog").unwrap();
        assert_eq!(a, b);

        let filtered = a.clone().filtered(Predicate::gt("age", 3));
        assert_ne!(a, filtered);
        assert_ne!(
            filtered.clone(),
            filtered.clone().sorted(vec![SortDescriptor::asc("age")])
        );
    }

    #[test]
    fn test_property_sources() {
        let schema = schema();
        let owner = ObjKey::new(0);

        let list = CollectionSpec::property(&schema, "Person", owner, "dogs").unwrap();
        assert!(matches!(list.source(), CollectionSource::List { .. }));
        assert_eq!(list.table_id(), schema.table_id("Dog").unwrap());

        let set = CollectionSpec::property(&schema, "Person", owner, "cats").unwrap();
        assert!(matches!(set.source(), CollectionSource::Set { .. }));

        let backlinks = CollectionSpec::property(&schema, "Dog", owner, "owners").unwrap();
        assert_eq!(backlinks.table_id(), schema.table_id("Person").unwrap());
        assert!(matches!(
            backlinks.source(),
            CollectionSource::LinkingObjects { .. }
        ));

        assert!(CollectionSpec::property(&schema, "Person", owner, "name").is_err());
    }

    #[test]
    fn test_filters_compose() {
        let schema = schema();
        let spec = CollectionSpec::table(&schema, "Dog")
            .unwrap()
            .filtered(Predicate::gt("age", 1))
            .filtered(Predicate::lt("age", 5));
        assert_eq!(
            spec.filter(),
            Some(&Predicate::And(vec![
                Predicate::gt("age", 1),
                Predicate::lt("age", 5)
            ]))
        );
    }
}

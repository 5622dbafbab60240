//! Schema and value validation
//!
//! Schema checks run once when a schema is built. Value checks run on
//! every write before the value reaches a row:
//! - No implicit type coercion (an int never lands in a double slot)
//! - Null only where the property is optional
//! - Collections hold only links

use std::collections::HashSet;

use super::types::{ObjectSchema, Property, PropertyKind};
use super::value::Value;
use crate::error::{Error, Result};

/// Validates a list of object types as a whole.
pub(crate) fn validate_schema(objects: &[ObjectSchema]) -> Result<()> {
    let mut names = HashSet::new();
    for object in objects {
        if object.name().is_empty() {
            return Err(Error::schema("Object type name must not be empty"));
        }
        if !names.insert(object.name()) {
            return Err(Error::schema(format!(
                "Object type '{}' is declared more than once",
                object.name()
            )));
        }
    }

    for object in objects {
        let mut properties = HashSet::new();
        for property in object.properties() {
            if !properties.insert(property.name.as_str()) {
                return Err(Error::schema(format!(
                    "Property '{}.{}' is declared more than once",
                    object.name(),
                    property.name
                )));
            }
            validate_property(objects, object, property)?;
        }
    }
    Ok(())
}

fn find<'a>(objects: &'a [ObjectSchema], name: &str) -> Option<&'a ObjectSchema> {
    objects.iter().find(|o| o.name() == name)
}

fn validate_property(
    objects: &[ObjectSchema],
    object: &ObjectSchema,
    property: &Property,
) -> Result<()> {
    if let Some(target) = property.kind.link_target() {
        if find(objects, target).is_none() {
            return Err(Error::schema(format!(
                "Property '{}.{}' links to unknown type '{}'",
                object.name(),
                property.name,
                target
            )));
        }
        if property.kind.is_collection() && property.optional {
            return Err(Error::schema(format!(
                "Collection property '{}.{}' cannot be optional",
                object.name(),
                property.name
            )));
        }
    }

    if let PropertyKind::LinkingObjects {
        origin,
        property: origin_property,
    } = &property.kind
    {
        let origin_schema = find(objects, origin).ok_or_else(|| {
            Error::schema(format!(
                "Linking objects '{}.{}' names unknown origin type '{}'",
                object.name(),
                property.name,
                origin
            ))
        })?;
        let forward = origin_schema.property(origin_property).ok_or_else(|| {
            Error::schema(format!(
                "Linking objects '{}.{}' names unknown property '{}.{}'",
                object.name(),
                property.name,
                origin,
                origin_property
            ))
        })?;
        if forward.kind.link_target() != Some(object.name()) {
            return Err(Error::schema(format!(
                "Property '{}.{}' does not link to '{}'",
                origin,
                origin_property,
                object.name()
            )));
        }
    }
    Ok(())
}

/// Validates a value against a stored property's kind and nullability.
///
/// Link targets are checked for existence by the write transaction.
pub(crate) fn validate_value(object: &ObjectSchema, property: &Property, value: &Value) -> Result<()> {
    let ok = match (&property.kind, value) {
        (_, Value::Null) => property.optional,
        (PropertyKind::Bool, Value::Bool(_)) => true,
        (PropertyKind::Int, Value::Int(_)) => true,
        (PropertyKind::Double, Value::Double(_)) => true,
        (PropertyKind::String, Value::String(_)) => true,
        (PropertyKind::Timestamp, Value::Timestamp(_)) => true,
        (PropertyKind::Object { .. }, Value::Link(_)) => true,
        (PropertyKind::List { .. }, Value::List(_)) => true,
        (PropertyKind::Set { .. }, Value::Set(_)) => true,
        (PropertyKind::Dictionary { .. }, Value::Dictionary(_)) => true,
        _ => false,
    };

    if ok {
        Ok(())
    } else if value.is_null() {
        Err(Error::schema(format!(
            "Property '{}.{}' is not optional",
            object.name(),
            property.name
        )))
    } else {
        Err(Error::schema(format!(
            "Type mismatch for '{}.{}': expected {}, got {}",
            object.name(),
            property.name,
            property.kind.type_name(),
            value.type_name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn dog() -> ObjectSchema {
        ObjectSchema::new(
            "Dog",
            vec![Property::string("name"), Property::object("owner", "Person")],
        )
    }

    fn person() -> ObjectSchema {
        ObjectSchema::new(
            "Person",
            vec![
                Property::string("name"),
                Property::linking_objects("dogs", "Dog", "owner"),
            ],
        )
    }

    #[test]
    fn test_valid_schema() {
        assert!(Schema::new(vec![dog(), person()]).is_ok());
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let err = Schema::new(vec![dog(), dog(), person()]).unwrap_err();
        assert_eq!(err.code(), "LIVE_SCHEMA_INVALID");
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let thing = ObjectSchema::new("Thing", vec![Property::int("a"), Property::string("a")]);
        assert!(Schema::new(vec![thing]).is_err());
    }

    #[test]
    fn test_unknown_link_target_rejected() {
        assert!(Schema::new(vec![dog()]).is_err());
    }

    #[test]
    fn test_linking_objects_must_name_forward_link() {
        let person = ObjectSchema::new(
            "Person",
            vec![Property::linking_objects("dogs", "Dog", "name")],
        );
        assert!(Schema::new(vec![dog(), person]).is_err());
    }

    #[test]
    fn test_value_type_checks() {
        let schema = ObjectSchema::new(
            "Thing",
            vec![Property::int("count"), Property::string("label").optional()],
        );
        let count = schema.property("count").unwrap();
        let label = schema.property("label").unwrap();

        assert!(validate_value(&schema, count, &Value::Int(1)).is_ok());
        assert!(validate_value(&schema, count, &Value::Double(1.0)).is_err());
        assert!(validate_value(&schema, count, &Value::Null).is_err());
        assert!(validate_value(&schema, label, &Value::Null).is_ok());
    }
}

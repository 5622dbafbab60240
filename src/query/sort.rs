//! Sorting for live collections
//!
//! Sorts are stable: rows that compare equal on every descriptor keep
//! their source order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::compare_values;
use crate::error::{Error, Result};
use crate::mvcc::ObjectData;
use crate::schema::ObjectSchema;

/// Sort by one stored property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortDescriptor {
    /// Property to sort by
    pub property: String,
    /// Ascending when true
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            ascending: true,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            ascending: false,
        }
    }
}

/// Sort descriptors bound to the slots of one object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSort {
    keys: Vec<(usize, bool)>,
}

impl CompiledSort {
    /// Resolves each descriptor to a slot.
    ///
    /// # Errors
    ///
    /// `InvalidPredicate` for unknown, computed or collection properties.
    pub fn compile(descriptors: &[SortDescriptor], object_schema: &ObjectSchema) -> Result<Self> {
        let keys = descriptors
            .iter()
            .map(|d| {
                let invalid = |reason: &str| {
                    Error::invalid_predicate(format!(
                        "cannot sort {} by '{}': {}",
                        object_schema.name(),
                        d.property,
                        reason
                    ))
                };
                let prop = object_schema
                    .property(&d.property)
                    .ok_or_else(|| invalid("no such property"))?;
                if prop.kind.is_collection() {
                    return Err(invalid("collection properties are not sortable"));
                }
                let slot = object_schema
                    .slot(&d.property)
                    .ok_or_else(|| invalid("computed properties are not sortable"))?;
                Ok((slot, d.ascending))
            })
            .collect::<Result<_>>()?;
        Ok(Self { keys })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compares two rows by every descriptor in turn.
    pub fn compare(&self, a: &ObjectData, b: &ObjectData) -> Ordering {
        for &(slot, ascending) in &self.keys {
            let ordering = compare_values(a.get(slot), b.get(slot));
            let ordering = if ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

//! Predicate filtering for live collections
//!
//! Predicates are resolved against an object type before evaluation.
//! Resolution is where unknown properties and type mismatches are
//! reported, so a bad predicate fails the first time its collection is
//! evaluated and never silently matches nothing.

use serde::{Deserialize, Serialize};

use super::compare_values;
use crate::error::{Error, Result};
use crate::mvcc::ObjectData;
use crate::schema::{ObjectSchema, PropertyKind, Value};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equality
    Eq,
    /// Inequality
    Neq,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Neq => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }

    fn is_ordering(&self) -> bool {
        !matches!(self, FilterOp::Eq | FilterOp::Neq)
    }
}

/// A filter over the properties of one object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Compare one stored property with a constant
    Compare {
        property: String,
        op: FilterOp,
        value: Value,
    },
    /// All sub-predicates match
    And(Vec<Predicate>),
    /// Any sub-predicate matches
    Or(Vec<Predicate>),
    /// The sub-predicate does not match
    Not(Box<Predicate>),
}

impl Predicate {
    /// Creates a comparison predicate
    pub fn compare(property: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Eq, value)
    }

    pub fn neq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Neq, value)
    }

    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Gt, value)
    }

    pub fn gte(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Gte, value)
    }

    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Lt, value)
    }

    pub fn lte(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, FilterOp::Lte, value)
    }

    /// Conjunction with another predicate
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Disjunction with another predicate
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    /// Negation
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Resolves property names to slots and type-checks every comparison.
    ///
    /// # Errors
    ///
    /// `InvalidPredicate` for unknown or computed properties, collection
    /// properties, mistyped constants, and ordering on bools or links.
    pub fn compile(&self, object_schema: &ObjectSchema) -> Result<CompiledPredicate> {
        Ok(match self {
            Predicate::Compare {
                property,
                op,
                value,
            } => {
                let slot = resolve(object_schema, property, *op, value)?;
                CompiledPredicate::Compare {
                    slot,
                    op: *op,
                    value: value.clone(),
                }
            }
            Predicate::And(all) => CompiledPredicate::And(
                all.iter()
                    .map(|p| p.compile(object_schema))
                    .collect::<Result<_>>()?,
            ),
            Predicate::Or(any) => CompiledPredicate::Or(
                any.iter()
                    .map(|p| p.compile(object_schema))
                    .collect::<Result<_>>()?,
            ),
            Predicate::Not(inner) => CompiledPredicate::Not(Box::new(inner.compile(object_schema)?)),
        })
    }
}

fn resolve(object_schema: &ObjectSchema, property: &str, op: FilterOp, value: &Value) -> Result<usize> {
    let invalid = |reason: String| {
        Error::invalid_predicate(format!(
            "{}.{} {} {:?}: {}",
            object_schema.name(),
            property,
            op.as_str(),
            value,
            reason
        ))
    };

    let prop = object_schema
        .property(property)
        .ok_or_else(|| invalid("no such property".into()))?;
    let slot = object_schema
        .slot(property)
        .ok_or_else(|| invalid("computed properties cannot be filtered".into()))?;

    if value.is_null() {
        if op.is_ordering() {
            return Err(invalid("null can only be compared with == or !=".into()));
        }
        return Ok(slot);
    }

    let compatible = match (&prop.kind, value) {
        (PropertyKind::Int | PropertyKind::Double, Value::Int(_) | Value::Double(_)) => true,
        (PropertyKind::String, Value::String(_)) => true,
        (PropertyKind::Timestamp, Value::Timestamp(_)) => true,
        (PropertyKind::Bool, Value::Bool(_)) => !op.is_ordering(),
        (PropertyKind::Object { .. }, Value::Link(_)) => !op.is_ordering(),
        _ => false,
    };
    if !compatible {
        return Err(invalid(format!(
            "cannot compare {} property with {}",
            prop.kind.type_name(),
            value.type_name()
        )));
    }
    Ok(slot)
}

/// A predicate bound to the slots of one object type.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledPredicate {
    Compare {
        slot: usize,
        op: FilterOp,
        value: Value,
    },
    And(Vec<CompiledPredicate>),
    Or(Vec<CompiledPredicate>),
    Not(Box<CompiledPredicate>),
}

impl CompiledPredicate {
    /// Evaluates the predicate against one row.
    pub fn matches(&self, row: &ObjectData) -> bool {
        match self {
            CompiledPredicate::Compare { slot, op, value } => compare_match(row.get(*slot), *op, value),
            CompiledPredicate::And(all) => all.iter().all(|p| p.matches(row)),
            CompiledPredicate::Or(any) => any.iter().any(|p| p.matches(row)),
            CompiledPredicate::Not(inner) => !inner.matches(row),
        }
    }
}

fn compare_match(actual: &Value, op: FilterOp, expected: &Value) -> bool {
    use std::cmp::Ordering;

    // Null only equals null and never orders
    if actual.is_null() || expected.is_null() {
        let both = actual.is_null() && expected.is_null();
        return match op {
            FilterOp::Eq => both,
            FilterOp::Neq => !both,
            _ => false,
        };
    }

    let ordering = compare_values(actual, expected);
    match op {
        FilterOp::Eq => ordering == Ordering::Equal,
        FilterOp::Neq => ordering != Ordering::Equal,
        FilterOp::Gt => ordering == Ordering::Greater,
        FilterOp::Gte => ordering != Ordering::Less,
        FilterOp::Lt => ordering == Ordering::Less,
        FilterOp::Lte => ordering != Ordering::Greater,
    }
}

//! Query evaluation for live collections
//!
//! Filters and sorts are plain data. They are bound to an object type's
//! slots on each evaluation, so the same predicate works against any
//! snapshot of that type.

mod predicate;
mod sort;

pub use predicate::{CompiledPredicate, FilterOp, Predicate};
pub use sort::{CompiledSort, SortDescriptor};

use std::cmp::Ordering;

use crate::schema::Value;

/// Compares two values for filtering and sorting.
///
/// Ordering rules:
/// - null < bool < number < string < timestamp < link < collections
/// - Ints and doubles compare numerically
/// - For same types, natural ordering
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let type_order = |v: &Value| -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Double(_) => 2,
            Value::String(_) => 3,
            Value::Timestamp(_) => 4,
            Value::Link(_) => 5,
            Value::List(_) | Value::Set(_) | Value::Dictionary(_) => 6,
        }
    };

    let a_type = type_order(a);
    let b_type = type_order(b);
    if a_type != b_type {
        return a_type.cmp(&b_type);
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Link(x), Value::Link(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_order() {
        assert_eq!(compare_values(&Value::Null, &Value::Bool(false)), Ordering::Less);
        assert_eq!(compare_values(&Value::Int(100), &Value::from("a")), Ordering::Less);
    }

    #[test]
    fn test_mixed_numeric_comparison() {
        assert_eq!(compare_values(&Value::Int(2), &Value::Double(2.5)), Ordering::Less);
        assert_eq!(compare_values(&Value::Double(2.0), &Value::Int(2)), Ordering::Equal);
    }
}

//! Predicate factories: and/or/not and condition tests.

use serde_json::Value;

use crate::ast::{PropMap, PropValue};

pub const REQUIRED_VARIADIC: &[&str] = &["operands"];
pub const REQUIRED_NOT: &[&str] = &["operand"];
pub const REQUIRED_TEST: &[&str] = &["subject", "condition"];

pub fn test_defaults(properties: &mut PropMap) {
    properties
        .entry("negate".to_string())
        .or_insert_with(|| PropValue::Value(Value::Bool(false)));
}

//! Expression factories: references, formats, navigation, iteration,
//! validation, and function calls.

use crate::ast::{PropMap, PropValue};

pub const REQUIRED_REFERENCE: &[&str] = &["path"];
pub const REQUIRED_FORMAT: &[&str] = &["template"];
pub const REQUIRED_NEXT: &[&str] = &["goto"];
pub const REQUIRED_ITERATE: &[&str] = &["input", "iterator"];
pub const REQUIRED_VALIDATION: &[&str] = &["when", "message"];
pub const REQUIRED_FUNCTION: &[&str] = &["name"];

pub fn function_defaults(properties: &mut PropMap) {
    properties
        .entry("arguments".to_string())
        .or_insert_with(|| PropValue::List(vec![]));
}

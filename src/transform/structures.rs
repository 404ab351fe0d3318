//! Structure factories: journeys, steps, and blocks.

use serde_json::Value;

use crate::ast::{PropMap, PropValue};

pub const REQUIRED_JOURNEY: &[&str] = &["code", "path", "title"];
pub const REQUIRED_STEP: &[&str] = &["path"];
pub const REQUIRED_BLOCK: &[&str] = &["variant"];

/// Structural list properties default to empty so wiring and handlers can
/// iterate them without presence checks.
pub fn journey_defaults(properties: &mut PropMap) {
    for name in ["steps", "children", "onLoad", "onAccess"] {
        properties
            .entry(name.to_string())
            .or_insert_with(|| PropValue::List(vec![]));
    }
}

pub fn step_defaults(properties: &mut PropMap) {
    for name in ["blocks", "onLoad", "onAccess", "onAction", "onSubmission"] {
        properties
            .entry(name.to_string())
            .or_insert_with(|| PropValue::List(vec![]));
    }
    properties
        .entry("isEntryPoint".to_string())
        .or_insert_with(|| PropValue::Value(Value::Bool(false)));
}

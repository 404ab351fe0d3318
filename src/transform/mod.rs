//! Transform phase: declarative JSON → identified AST.
//!
//! The entry point validates that the input is an object with a known
//! `type` discriminator, dispatches to the per-family factories, and
//! recurses into properties through `transform_value`: primitives pass
//! through, arrays are mapped element-wise, plain objects are descended,
//! and objects with a known discriminator become child nodes.

pub mod expressions;
pub mod predicates;
pub mod pseudo;
pub mod structures;
pub mod transitions;

use serde_json::Value;

use crate::ast::raw::RawArena;
use crate::ast::{AstNode, Node, NodeKind, PropMap, PropValue};
use crate::error::{EngineError, ErrorKind};
use crate::id::{IdCategory, IdGenerator, NodeId};
use crate::registry::NodeRegistry;

/// Mutable compile state threaded through the factories.
pub struct TransformContext<'a> {
    pub ids: &'a mut IdGenerator,
    pub registry: &'a mut NodeRegistry,
    pub arena: &'a mut RawArena,
    /// `CompileAst` during compilation, `RuntimeAst` for overlay expansion.
    pub category: IdCategory,
    pub errors: Vec<EngineError>,
}

impl<'a> TransformContext<'a> {
    pub fn new(
        ids: &'a mut IdGenerator,
        registry: &'a mut NodeRegistry,
        arena: &'a mut RawArena,
        category: IdCategory,
    ) -> Self {
        TransformContext {
            ids,
            registry,
            arena,
            category,
            errors: Vec::new(),
        }
    }
}

/// Transform a declarative tree rooted at `value`. Returns the root node ID
/// or every error found along the way.
pub fn transform(
    value: &Value,
    cx: &mut TransformContext<'_>,
) -> Result<NodeId, Vec<EngineError>> {
    let root = match discriminator_of(value) {
        Some(_) => transform_node(value, None, "", cx),
        None => {
            cx.errors.push(root_error(value));
            None
        }
    };

    match root {
        Some(id) if cx.errors.is_empty() => Ok(id),
        _ => Err(std::mem::take(&mut cx.errors)),
    }
}

fn root_error(value: &Value) -> EngineError {
    match value {
        Value::Object(obj) => match obj.get("type") {
            Some(Value::String(disc)) => EngineError::unknown_node_type(disc, ""),
            _ => EngineError::invalid("Declarative node has no 'type' discriminator", ""),
        },
        other => EngineError::invalid(
            format!("Declarative input must be an object, got {}", json_kind(other)),
            "",
        ),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn discriminator_of(value: &Value) -> Option<NodeKind> {
    value
        .as_object()?
        .get("type")?
        .as_str()
        .and_then(NodeKind::from_discriminator)
}

/// Transform one declarative node. Pushes errors and returns `None` when
/// the node is unusable.
pub fn transform_node(
    value: &Value,
    parent: Option<&NodeId>,
    path: &str,
    cx: &mut TransformContext<'_>,
) -> Option<NodeId> {
    let Some(kind) = discriminator_of(value) else {
        cx.errors.push(root_error(value).with_path(path));
        return None;
    };
    let obj = value.as_object().expect("discriminated node is an object");

    let id = cx.ids.next(cx.category);
    let mut properties = PropMap::new();
    for (name, child) in obj {
        if name == "type" {
            continue;
        }
        let child_path = join_path(path, name);
        let transformed = transform_value(child, Some(&id), &child_path, cx);
        properties.insert(name.clone(), transformed);
    }

    apply_defaults(kind, &mut properties);
    let missing = required_properties(kind)
        .iter()
        .filter(|name| !properties.contains_key(**name))
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        cx.errors.push(
            EngineError::new(
                ErrorKind::Invalid,
                format!(
                    "{} node is missing required properties: {}",
                    kind.discriminator(),
                    missing.join(", ")
                ),
            )
            .with_node(id.clone())
            .with_path(path),
        );
        return None;
    }

    let raw = cx.arena.intern(value.clone());
    let node = Node::Ast(AstNode {
        id: id.clone(),
        kind,
        properties,
        raw,
    });
    if let Err(err) = cx.registry.register(node, parent.cloned(), path) {
        cx.errors.push(
            EngineError::new(ErrorKind::DuplicateId, err.to_string())
                .with_node(id.clone())
                .with_path(path),
        );
        return None;
    }
    Some(id)
}

/// Central property transform shared by every factory.
pub fn transform_value(
    value: &Value,
    parent: Option<&NodeId>,
    path: &str,
    cx: &mut TransformContext<'_>,
) -> PropValue {
    match value {
        Value::Array(items) => PropValue::List(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    let item_path = format!("{}[{}]", path, index);
                    transform_value(item, parent, &item_path, cx)
                })
                .collect(),
        ),
        Value::Object(_) if discriminator_of(value).is_some() => {
            match transform_node(value, parent, path, cx) {
                Some(id) => PropValue::Node(id),
                // Error already recorded; keep a hole so siblings still transform.
                None => PropValue::Value(Value::Null),
            }
        }
        Value::Object(obj) => PropValue::Map(
            obj.iter()
                .map(|(name, child)| {
                    let child_path = join_path(path, name);
                    (name.clone(), transform_value(child, parent, &child_path, cx))
                })
                .collect(),
        ),
        primitive => PropValue::Value(primitive.clone()),
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn required_properties(kind: NodeKind) -> &'static [&'static str] {
    match kind {
        NodeKind::Journey => structures::REQUIRED_JOURNEY,
        NodeKind::Step => structures::REQUIRED_STEP,
        NodeKind::Block => structures::REQUIRED_BLOCK,
        NodeKind::Reference => expressions::REQUIRED_REFERENCE,
        NodeKind::Format => expressions::REQUIRED_FORMAT,
        NodeKind::Next => expressions::REQUIRED_NEXT,
        NodeKind::Iterate => expressions::REQUIRED_ITERATE,
        NodeKind::Validation => expressions::REQUIRED_VALIDATION,
        NodeKind::Function(_) => expressions::REQUIRED_FUNCTION,
        NodeKind::And | NodeKind::Or => predicates::REQUIRED_VARIADIC,
        NodeKind::Not => predicates::REQUIRED_NOT,
        NodeKind::Test => predicates::REQUIRED_TEST,
        NodeKind::Load => transitions::REQUIRED_LOAD,
        NodeKind::Access => transitions::REQUIRED_ACCESS,
        NodeKind::Submit => transitions::REQUIRED_SUBMIT,
        NodeKind::Action => transitions::REQUIRED_ACTION,
    }
}

fn apply_defaults(kind: NodeKind, properties: &mut PropMap) {
    match kind {
        NodeKind::Journey => structures::journey_defaults(properties),
        NodeKind::Step => structures::step_defaults(properties),
        NodeKind::Function(_) => expressions::function_defaults(properties),
        NodeKind::Test => predicates::test_defaults(properties),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(value: Value) -> Result<(NodeId, NodeRegistry), Vec<EngineError>> {
        let mut ids = IdGenerator::new();
        let mut registry = NodeRegistry::new();
        let mut arena = RawArena::new();
        let mut cx =
            TransformContext::new(&mut ids, &mut registry, &mut arena, IdCategory::CompileAst);
        transform(&value, &mut cx).map(|root| (root, registry))
    }

    #[test]
    fn rejects_non_object_input() {
        let errors = run(json!(42)).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::Invalid);
    }

    #[test]
    fn rejects_unknown_discriminator() {
        let errors = run(json!({"type": "Structure.Page"})).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::UnknownNodeType);
    }

    #[test]
    fn missing_required_property_is_invalid() {
        let errors = run(json!({"type": "Structure.Journey", "path": "/j"})).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::Invalid);
        assert!(errors[0].message.contains("code"));
    }

    #[test]
    fn nested_objects_without_discriminator_are_descended() {
        let (root, registry) = run(json!({
            "type": "Structure.Journey",
            "code": "j",
            "path": "/j",
            "title": "J",
            "metadata": {"theme": "plain"},
        }))
        .unwrap();
        let journey = registry.ast(&root).unwrap();
        assert!(matches!(
            journey.prop("metadata"),
            Some(PropValue::Map(entries)) if entries.contains_key("theme")
        ));
    }
}

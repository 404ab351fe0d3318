//! Transformer tests: declarative JSON → identified AST.

use serde_json::{Value, json};

use engine::ast::raw::RawArena;
use engine::error::ErrorKind;
use engine::id::{IdCategory, IdGenerator};
use engine::program;
use engine::registry::NodeRegistry;
use engine::transform::{self, TransformContext};

/// Count declarative nodes: objects carrying a known `type` discriminator.
fn count_nodes(value: &Value) -> usize {
    match value {
        Value::Object(obj) => {
            let own = usize::from(
                obj.get("type")
                    .and_then(Value::as_str)
                    .and_then(engine::ast::NodeKind::from_discriminator)
                    .is_some(),
            );
            own + obj.values().map(count_nodes).sum::<usize>()
        }
        Value::Array(items) => items.iter().map(count_nodes).sum(),
        _ => 0,
    }
}

#[test]
fn transform_registers_every_declared_node_with_its_source() {
    let source: Value =
        serde_json::from_str(include_str!("fixtures/email_validation.json")).unwrap();

    let mut ids = IdGenerator::new();
    let mut registry = NodeRegistry::new();
    let mut arena = RawArena::new();
    let mut cx = TransformContext::new(&mut ids, &mut registry, &mut arena, IdCategory::CompileAst);
    let root = transform::transform(&source, &mut cx).unwrap();

    assert_eq!(registry.len(), count_nodes(&source));

    // Every registered node's raw back-pointer is its exact source subtree.
    let journey = registry.ast(&root).unwrap();
    assert_eq!(arena.get(journey.raw), &source);
    for node in registry.iter() {
        let ast = node.as_ast().unwrap();
        let raw = arena.get(ast.raw);
        assert_eq!(
            raw.get("type").and_then(Value::as_str),
            Some(ast.kind.discriminator()),
        );
    }
}

#[test]
fn non_object_input_is_invalid() {
    let errors = program::compile(&json!(42)).unwrap_err();
    assert_eq!(errors[0].kind, ErrorKind::Invalid);

    let errors = program::compile(&json!(null)).unwrap_err();
    assert_eq!(errors[0].kind, ErrorKind::Invalid);
}

#[test]
fn unknown_discriminator_is_reported() {
    let errors = program::compile(&json!({"type": "Structure.Wizard"})).unwrap_err();
    assert_eq!(errors[0].kind, ErrorKind::UnknownNodeType);
}

#[test]
fn missing_required_properties_are_reported() {
    let errors = program::compile(&json!({
        "type": "Structure.Journey",
        "path": "/j",
        "title": "J",
    }))
    .unwrap_err();
    assert_eq!(errors[0].kind, ErrorKind::Invalid);
    assert!(errors[0].message.contains("code"), "{}", errors[0].message);
}

#[test]
fn duplicate_routes_fail_compilation() {
    let errors = program::compile(&json!({
        "type": "Structure.Journey",
        "code": "j",
        "path": "/j",
        "title": "J",
        "steps": [
            {"type": "Structure.Step", "path": "/s", "blocks": []},
            {"type": "Structure.Step", "path": "/s", "blocks": []},
        ],
    }))
    .unwrap_err();
    assert_eq!(errors[0].kind, ErrorKind::DuplicateRoute);
}

#[test]
fn compiled_program_summary_snapshot() {
    let program = program::compile_str(include_str!("fixtures/trivial_journey.json")).unwrap();
    insta::assert_json_snapshot!("trivial_journey_summary", program.summary());
}

#[test]
fn raw_source_points_back_at_the_declaration() {
    let source: Value =
        serde_json::from_str(include_str!("fixtures/trivial_journey.json")).unwrap();
    let program = program::compile(&source).unwrap();
    assert_eq!(program.raw_source(&program.journey), Some(&source));
}

//! Normalizer tests: implicit self values and `@self` resolution.

use serde_json::json;

use engine::ast::{NodeKind, PropValue};
use engine::error::ErrorKind;
use engine::program;

/// After normalization no reference path may contain the `@self` literal.
#[test]
fn no_self_segments_survive_normalization() {
    let program = program::compile_str(include_str!("fixtures/email_validation.json")).unwrap();
    for reference_id in program.nodes.ids_of_kind(NodeKind::Reference) {
        let reference = program.nodes.ast(reference_id).unwrap();
        let Some(PropValue::List(path)) = reference.prop("path") else {
            panic!("reference without a path list");
        };
        for segment in path {
            assert_ne!(segment.as_str(), Some("@self"), "unresolved @self segment");
        }
    }
}

#[test]
fn fields_receive_an_implicit_self_value_reference() {
    let program = program::compile_str(include_str!("fixtures/email_validation.json")).unwrap();
    let field_id = program
        .nodes
        .ids_of_kind(NodeKind::Block)
        .iter()
        .find(|id| program.nodes.ast(id).unwrap().is_field_block())
        .cloned()
        .unwrap();
    let field = program.nodes.ast(&field_id).unwrap();

    let value_id = field.node_prop("value").expect("field has a value reference");
    let value = program.nodes.ast(value_id).unwrap();
    assert_eq!(value.kind, NodeKind::Reference);
    let Some(PropValue::List(path)) = value.prop("path") else {
        panic!("value reference has no path");
    };
    assert_eq!(path[0].as_str(), Some("answers"));
    assert_eq!(path[1].as_str(), Some("email"));
}

#[test]
fn self_outside_a_field_is_rejected() {
    let errors = program::compile(&json!({
        "type": "Structure.Journey",
        "code": "j",
        "path": "/j",
        "title": "J",
        "steps": [{
            "type": "Structure.Step",
            "path": "/s",
            "blocks": [{
                "type": "Structure.Block",
                "variant": "panel",
                "content": {
                    "type": "Expression.Reference",
                    "path": ["answers", "@self"],
                },
            }],
        }],
    }))
    .unwrap_err();
    assert_eq!(errors[0].kind, ErrorKind::SelfOutsideField);
}

#[test]
fn self_in_a_field_without_code_is_rejected() {
    // `value` carries the only @self here; the block has no `code`, so it
    // is not a field and resolution fails on the explicit reference.
    let errors = program::compile(&json!({
        "type": "Structure.Journey",
        "code": "j",
        "path": "/j",
        "title": "J",
        "steps": [{
            "type": "Structure.Step",
            "path": "/s",
            "blocks": [{
                "type": "Structure.Block",
                "variant": "text-input",
                "code": {"missing": true},
                "label": "Broken",
                "hint": {
                    "type": "Expression.Reference",
                    "path": ["answers", "@self"],
                },
            }],
        }],
    }))
    .unwrap_err();
    assert!(
        errors
            .iter()
            .any(|error| error.kind == ErrorKind::MissingFieldCode),
        "{:?}",
        errors
    );
}

#[test]
fn expression_codes_are_cloned_with_fresh_ids() {
    let program = program::compile(&json!({
        "type": "Structure.Journey",
        "code": "j",
        "path": "/j",
        "title": "J",
        "steps": [{
            "type": "Structure.Step",
            "path": "/s",
            "blocks": [{
                "type": "Structure.Block",
                "variant": "text-input",
                "code": {
                    "type": "Expression.Format",
                    "template": "row-%1",
                    "arguments": [{
                        "type": "Expression.Reference",
                        "path": ["params", "row"],
                    }],
                },
                "label": "Dynamic",
            }],
        }],
    }))
    .unwrap();

    // The field's value reference holds a clone of the code expression
    // under fresh runtime-category IDs, not an alias of the original.
    let field_id = program
        .nodes
        .ids_of_kind(NodeKind::Block)
        .iter()
        .find(|id| program.nodes.ast(id).unwrap().is_field_block())
        .cloned()
        .unwrap();
    let field = program.nodes.ast(&field_id).unwrap();
    let original_code = field.node_prop("code").unwrap().clone();

    let value = program.nodes.ast(field.node_prop("value").unwrap()).unwrap();
    let Some(PropValue::List(path)) = value.prop("path") else {
        panic!("value reference has no path");
    };
    let clone_root = path[1].as_node().expect("resolved segment is a node");
    assert_ne!(clone_root, &original_code);
    assert!(clone_root.is_runtime());
    assert_eq!(
        program.nodes.ast(clone_root).unwrap().kind,
        NodeKind::Format
    );
}

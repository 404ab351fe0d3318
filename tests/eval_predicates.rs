//! Predicate semantics: short-circuiting and failure handling.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::json;

use engine::ast::NodeKind;
use engine::eval::Evaluator;
use engine::eval::context::EvaluationRequest;
use engine::id::NodeId;
use engine::program;

fn node_of_kind(program: &engine::program::Program, kind: NodeKind) -> NodeId {
    program.nodes.ids_of_kind(kind)[0].clone()
}

#[tokio::test]
async fn and_short_circuits_on_a_falsy_operand() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/short_circuit.json")).unwrap());
    let mut functions = helpers::base_registry();
    let expensive = helpers::counting_condition(&mut functions, "expensive", true);
    helpers::failing_condition(&mut functions, "failing");

    let evaluator = Evaluator::new(program.clone(), Arc::new(functions));
    let cx = evaluator.create_context(EvaluationRequest::default());

    let and = node_of_kind(&program, NodeKind::And);
    let result = evaluator.invoke(&and, &cx).await;
    assert_eq!(result.value, Some(json!(false)));
    assert_eq!(
        expensive.load(Ordering::SeqCst),
        0,
        "short-circuit must not evaluate the second operand"
    );
}

#[tokio::test]
async fn or_scans_past_failing_operands() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/short_circuit.json")).unwrap());
    let mut functions = helpers::base_registry();
    helpers::counting_condition(&mut functions, "expensive", true);
    let failing = helpers::failing_condition(&mut functions, "failing");

    let evaluator = Evaluator::new(program.clone(), Arc::new(functions));
    let cx = evaluator.create_context(EvaluationRequest::default());

    let or = node_of_kind(&program, NodeKind::Or);
    let result = evaluator.invoke(&or, &cx).await;
    assert_eq!(result.value, Some(json!(true)));
    assert_eq!(failing.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_operand_lists_have_identity_values() {
    let program = Arc::new(
        program::compile(&json!({
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
                    "allOf": {"type": "Predicate.And", "operands": []},
                    "anyOf": {"type": "Predicate.Or", "operands": []},
                }],
            }],
        }))
        .unwrap(),
    );
    let evaluator = Evaluator::new(program.clone(), Arc::new(helpers::base_registry()));
    let cx = evaluator.create_context(EvaluationRequest::default());

    let and = node_of_kind(&program, NodeKind::And);
    let or = node_of_kind(&program, NodeKind::Or);
    assert_eq!(evaluator.invoke(&and, &cx).await.value, Some(json!(true)));
    assert_eq!(evaluator.invoke(&or, &cx).await.value, Some(json!(false)));
}

#[tokio::test]
async fn test_negation_xors_the_condition_outcome() {
    let program = Arc::new(
        program::compile(&json!({
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
                    "gate": {
                        "type": "Predicate.Test",
                        "subject": "anything",
                        "condition": {"type": "Function.Condition", "name": "isRequired"},
                        "negate": true,
                    },
                }],
            }],
        }))
        .unwrap(),
    );
    let evaluator = Evaluator::new(program.clone(), Arc::new(helpers::base_registry()));
    let cx = evaluator.create_context(EvaluationRequest::default());

    let test = node_of_kind(&program, NodeKind::Test);
    // isRequired("anything") is true; negate flips it.
    assert_eq!(evaluator.invoke(&test, &cx).await.value, Some(json!(false)));
}

//! Evaluator basics: rendering, memoization, and overlay isolation.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::{Value, json};

use engine::ast::NodeKind;
use engine::eval::Evaluator;
use engine::eval::context::EvaluationRequest;
use engine::lifecycle::{self, RequestOutcome};
use engine::program;

#[tokio::test]
async fn trivial_step_renders_empty_blocks() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/trivial_journey.json")).unwrap());
    let functions = Arc::new(helpers::base_registry());

    let outcome = lifecycle::run_request(
        program,
        functions,
        EvaluationRequest::default(),
        "/j/s",
    )
    .await
    .unwrap();

    let RequestOutcome::Render {
        journey,
        navigation,
        errors,
    } = outcome
    else {
        panic!("expected a render outcome");
    };
    assert!(navigation.is_none());
    assert!(errors.is_empty());
    assert!(journey.error.is_none());

    let value = journey.value.unwrap();
    let steps = value
        .pointer("/properties/steps")
        .and_then(Value::as_array)
        .unwrap();
    assert_eq!(steps.len(), 1);
    let blocks = steps[0]
        .pointer("/properties/blocks")
        .and_then(Value::as_array)
        .unwrap();
    assert!(blocks.is_empty());
}

#[tokio::test]
async fn unknown_routes_are_rejected() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/trivial_journey.json")).unwrap());
    let functions = Arc::new(helpers::base_registry());

    let error = lifecycle::run_request(
        program,
        functions,
        EvaluationRequest::default(),
        "/nowhere",
    )
    .await
    .unwrap_err();
    assert_eq!(error.kind, engine::error::ErrorKind::Invalid);
}

/// Two consecutive invocations return equal results without re-entering
/// the handler.
#[tokio::test]
async fn invocation_is_idempotent_within_one_evaluator() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/short_circuit.json")).unwrap());
    let mut functions = helpers::base_registry();
    let expensive = helpers::counting_condition(&mut functions, "expensive", true);
    helpers::failing_condition(&mut functions, "failing");

    let evaluator = Evaluator::new(program.clone(), Arc::new(functions));
    let cx = evaluator.create_context(EvaluationRequest::default());

    let condition = program
        .nodes
        .ids_of_kind(NodeKind::Function(engine::ast::FunctionType::Condition))
        .iter()
        .find(|id| {
            program.nodes.ast(id).unwrap().string_prop("name") == Some("expensive")
        })
        .cloned()
        .unwrap();

    let first = evaluator.invoke(&condition, &cx).await;
    let second = evaluator.invoke(&condition, &cx).await;
    assert_eq!(first, second);
    assert_eq!(expensive.load(Ordering::SeqCst), 1);
}

/// Evaluating a compiled program twice with different requests leaves the
/// base program untouched.
#[tokio::test]
async fn overlay_isolation_preserves_the_compiled_program() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/email_validation.json")).unwrap());
    let before = serde_json::to_string(&program.summary()).unwrap();

    for request in [
        EvaluationRequest::default().with_transition_type("submission"),
        EvaluationRequest::default()
            .with_post("email", json!("a@b"))
            .with_transition_type("submission"),
    ] {
        let outcome = lifecycle::run_request(
            program.clone(),
            Arc::new(helpers::registry_with_effects().0),
            request,
            "/account/contact",
        )
        .await
        .unwrap();
        assert!(matches!(outcome, RequestOutcome::Render { .. }));
    }

    let after = serde_json::to_string(&program.summary()).unwrap();
    assert_eq!(before, after);
}

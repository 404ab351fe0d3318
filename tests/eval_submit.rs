//! Submission lifecycle: validation, branch effects, and navigation.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::json;

use engine::eval::context::EvaluationRequest;
use engine::lifecycle::{self, RequestOutcome};
use engine::program;

fn render(outcome: RequestOutcome) -> (Option<serde_json::Value>, Vec<serde_json::Value>) {
    match outcome {
        RequestOutcome::Render {
            navigation, errors, ..
        } => (navigation, errors),
        RequestOutcome::Redirect { .. } => panic!("unexpected redirect"),
    }
}

#[tokio::test]
async fn missing_required_answer_fails_validation() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/email_validation.json")).unwrap());
    let (functions, valid, invalid) = helpers::registry_with_effects();

    let request = EvaluationRequest::default().with_transition_type("submission");
    let outcome = lifecycle::run_request(program, Arc::new(functions), request, "/account/contact")
        .await
        .unwrap();

    let (navigation, errors) = render(outcome);
    assert!(navigation.is_none());
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].get("message"), Some(&json!("Required")));
    assert_eq!(errors[0].get("fieldCode"), Some(&json!("email")));

    // Transition ordering: only the invalid branch ran its effects.
    assert_eq!(valid.load(Ordering::SeqCst), 0);
    assert_eq!(invalid.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn present_answer_passes_validation_and_navigates() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/email_validation.json")).unwrap());
    let (functions, valid, invalid) = helpers::registry_with_effects();

    let request = EvaluationRequest::default()
        .with_post("email", json!("a@b"))
        .with_transition_type("submission");
    let outcome = lifecycle::run_request(program, Arc::new(functions), request, "/account/contact")
        .await
        .unwrap();

    let (navigation, errors) = render(outcome);
    assert!(errors.is_empty());
    assert_eq!(navigation, Some(json!("/done")));
    assert_eq!(valid.load(Ordering::SeqCst), 1);
    assert_eq!(invalid.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn submit_navigation_picks_the_first_matching_next() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/branching_submit.json")).unwrap());

    let request = EvaluationRequest::default().with_post("action", json!("save"));
    let outcome = lifecycle::run_request(
        program.clone(),
        Arc::new(helpers::base_registry()),
        request,
        "/claim/edit",
    )
    .await
    .unwrap();
    let (navigation, _) = render(outcome);
    assert_eq!(navigation, Some(json!("/summary")));

    let request = EvaluationRequest::default().with_post("action", json!("edit"));
    let outcome = lifecycle::run_request(
        program,
        Arc::new(helpers::base_registry()),
        request,
        "/claim/edit",
    )
    .await
    .unwrap();
    let (navigation, _) = render(outcome);
    assert_eq!(navigation, Some(json!("/next")));
}

#[tokio::test]
async fn validation_is_skipped_outside_submission() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/email_validation.json")).unwrap());
    let (functions, valid, invalid) = helpers::registry_with_effects();

    // A plain GET: no submission transition runs at all.
    let outcome = lifecycle::run_request(
        program,
        Arc::new(functions),
        EvaluationRequest::default(),
        "/account/contact",
    )
    .await
    .unwrap();

    let (navigation, errors) = render(outcome);
    assert!(navigation.is_none());
    assert!(errors.is_empty());
    assert_eq!(valid.load(Ordering::SeqCst), 0);
    assert_eq!(invalid.load(Ordering::SeqCst), 0);
}

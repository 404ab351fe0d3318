//! Lifecycle coordination for one HTTP request.
//!
//! Resolves the step from the route, stamps the current-step flags into
//! the overlay, runs `onAccess` guards (possibly redirecting), runs
//! `onLoad` effects, on submission runs the step's `onSubmission`
//! transitions, and finally evaluates the journey into the rendering
//! artefact.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{EngineError, ErrorKind};
use crate::eval::Evaluator;
use crate::eval::context::EvaluationRequest;
use crate::eval::handlers::ThunkResult;
use crate::functions::FunctionRegistry;
use crate::id::NodeId;
use crate::program::Program;

/// What the routing layer should do with the request.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// An access guard denied the step.
    Redirect {
        to: Value,
        message: Option<Value>,
    },
    /// Render the evaluated journey; `navigation` carries the submit
    /// transition's first-match target when one fired.
    Render {
        journey: ThunkResult,
        navigation: Option<Value>,
        errors: Vec<Value>,
    },
}

/// Run one request against a compiled program with a fresh evaluator.
pub async fn run_request(
    program: Arc<Program>,
    functions: Arc<FunctionRegistry>,
    request: EvaluationRequest,
    path: &str,
) -> Result<RequestOutcome, EngineError> {
    let Some(step) = program.resolve_step(path).cloned() else {
        return Err(EngineError::new(
            ErrorKind::Invalid,
            format!("no step registered at route '{}'", path),
        ));
    };
    let evaluator = Evaluator::new(program, functions);
    run_step(&evaluator, request, &step).await
}

/// Run one request against an already-built evaluator (callers that need
/// an observer or custom options construct the evaluator themselves).
pub async fn run_step(
    evaluator: &Evaluator,
    request: EvaluationRequest,
    step: &NodeId,
) -> Result<RequestOutcome, EngineError> {
    let entry = evaluator.scope_entry(step).ok_or_else(|| {
        EngineError::new(ErrorKind::Invalid, "step has no scope entry").with_node(step.clone())
    })?;

    evaluator.set_runtime_metadata(step, "isCurrentStep", Value::Bool(true));
    for ancestor in &entry.chain {
        if ancestor != step {
            evaluator.set_runtime_metadata(ancestor, "isAncestorOfStep", Value::Bool(true));
        }
    }

    let cx = evaluator.create_context(request);

    // Access guards, root-first. The first denial redirects.
    for ancestor in &entry.chain {
        let Some(node) = evaluator.node(ancestor).and_then(|n| n.as_ast().cloned()) else {
            continue;
        };
        for transition in node.node_list_prop("onAccess") {
            let result = evaluator.invoke(&transition, &cx).await;
            if let Some(error) = result.error {
                return Err(error);
            }
            if let Some(outcome) = result.value {
                let allowed = outcome
                    .get("allowed")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if !allowed {
                    return Ok(RequestOutcome::Redirect {
                        to: outcome.get("redirect").cloned().unwrap_or(Value::Null),
                        message: outcome.get("message").cloned(),
                    });
                }
            }
        }
    }

    // Load effects, root-first along the precomputed scope chain.
    for transition in &entry.load_transitions {
        let result = evaluator.invoke(transition, &cx).await;
        if let Some(error) = result.error {
            return Err(error);
        }
    }

    // Submission: first transition producing an outcome wins.
    let mut navigation = None;
    let mut errors = Vec::new();
    if cx.transition_type().as_deref() == Some("submission") {
        let step_node = evaluator
            .node(step)
            .and_then(|n| n.as_ast().cloned())
            .ok_or_else(|| {
                EngineError::new(ErrorKind::Invalid, "current step is not registered")
                    .with_node(step.clone())
            })?;
        for transition in step_node.node_list_prop("onSubmission") {
            let result = evaluator.invoke(&transition, &cx).await;
            if let Some(error) = result.error {
                return Err(error);
            }
            let Some(outcome) = result.value else {
                // `when` gate skipped this transition.
                continue;
            };
            if let Some(Value::Array(records)) = outcome.get("errors").cloned() {
                errors.extend(records);
            }
            navigation = outcome.get("next").cloned();
            break;
        }
    }

    let output = evaluator.evaluate(&cx).await;
    Ok(RequestOutcome::Render {
        journey: output.journey,
        navigation,
        errors,
    })
}

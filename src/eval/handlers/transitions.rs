//! Transition handlers.
//!
//! Submission: idle → validating → (valid | invalid) → effects →
//! navigation. Access: guards → (allow → effects → next) | (deny →
//! redirect). Effects run strictly in order and a failing effect blocks
//! the transition; `next`/`redirect` outcome lists are first-match.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::ast::{AstNode, NodeKind, PropValue};
use crate::eval::Evaluator;
use crate::eval::context::EvalContext;
use crate::eval::overlay::RuntimeHooks;
use crate::id::NodeId;

use super::{
    HandlerMode, ThunkHandler, ThunkResult, eval_prop, first_match, is_truthy, run_effects,
};

pub fn handler_for(node: &AstNode) -> Arc<dyn ThunkHandler> {
    let node = node.clone();
    match node.kind {
        NodeKind::Load => Arc::new(LoadHandler { node }),
        NodeKind::Access => Arc::new(AccessHandler { node }),
        NodeKind::Submit => Arc::new(SubmitHandler { node }),
        NodeKind::Action => Arc::new(ActionHandler { node }),
        other => unreachable!("not a transition kind: {:?}", other),
    }
}

// =============================================================================
// LOAD
// =============================================================================

pub struct LoadHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for LoadHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "LoadHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Async
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        let cx = cx.with_transition("load");
        if let Err(error) = run_effects(ev, &cx, &self.node.node_list_prop("effects")).await {
            return ThunkResult::failure(error, self.source());
        }
        let next = first_match(ev, &cx, &self.node.node_list_prop("next")).await;
        let mut outcome = Map::new();
        if let Some(next) = next {
            outcome.insert("next".to_string(), next);
        }
        ThunkResult::value(Value::Object(outcome), self.source())
    }
}

// =============================================================================
// ACCESS
// =============================================================================

pub struct AccessHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for AccessHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "AccessHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Async
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        let cx = cx.with_transition("access");
        let allowed = match self.node.prop("guards") {
            // A guard that errors denies access.
            Some(guards) => eval_prop(ev, &cx, guards)
                .await
                .as_ref()
                .is_some_and(is_truthy),
            None => true,
        };

        let mut outcome = Map::new();
        outcome.insert("allowed".to_string(), Value::Bool(allowed));
        if !allowed {
            if let Some(redirect) =
                first_match(ev, &cx, &self.node.node_list_prop("redirect")).await
            {
                outcome.insert("redirect".to_string(), redirect);
            }
            if let Some(message) = self.node.prop("message") {
                if let Some(message) = eval_prop(ev, &cx, message).await {
                    outcome.insert("message".to_string(), message);
                }
            }
            return ThunkResult::value(Value::Object(outcome), self.source());
        }

        if let Err(error) = run_effects(ev, &cx, &self.node.node_list_prop("effects")).await {
            return ThunkResult::failure(error, self.source());
        }
        if let Some(next) = first_match(ev, &cx, &self.node.node_list_prop("next")).await {
            outcome.insert("next".to_string(), next);
        }
        ThunkResult::value(Value::Object(outcome), self.source())
    }
}

// =============================================================================
// SUBMIT
// =============================================================================

pub struct SubmitHandler {
    node: AstNode,
}

impl SubmitHandler {
    fn branch_ids(&self, branch: &str, sub: &str) -> Vec<NodeId> {
        let Some(PropValue::Map(entries)) = self.node.prop(branch) else {
            return vec![];
        };
        match entries.get(sub) {
            Some(PropValue::List(items)) => items
                .iter()
                .filter_map(|item| item.as_node().cloned())
                .collect(),
            Some(PropValue::Node(id)) => vec![id.clone()],
            _ => vec![],
        }
    }
}

#[async_trait]
impl ThunkHandler for SubmitHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "SubmitHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Async
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        let cx = cx.with_transition("submission");

        if let Some(when) = self.node.prop("when") {
            let gate = eval_prop(ev, &cx, when).await;
            if !gate.as_ref().is_some_and(is_truthy) {
                return ThunkResult::undefined(self.source());
            }
        }

        let validate = match self.node.prop("validate") {
            Some(validate) => eval_prop(ev, &cx, validate)
                .await
                .as_ref()
                .is_some_and(is_truthy),
            None => false,
        };

        let mut errors = Vec::new();
        if validate {
            for validation in step_validations(ev, &self.node.id) {
                let result = ev.invoke(&validation, &cx).await;
                if let Some(record) = result.value {
                    if !record.is_null() {
                        errors.push(record);
                    }
                }
            }
        }
        let valid = errors.is_empty();

        let branch = if valid { "onValid" } else { "onInvalid" };
        if let Err(error) = run_effects(ev, &cx, &self.branch_ids(branch, "effects")).await {
            return ThunkResult::failure(error, self.source());
        }
        let next = first_match(ev, &cx, &self.branch_ids(branch, "next")).await;

        let mut outcome = Map::new();
        outcome.insert("valid".to_string(), Value::Bool(valid));
        outcome.insert("errors".to_string(), Value::Array(errors));
        if let Some(next) = next {
            outcome.insert("next".to_string(), next);
        }
        ThunkResult::value(Value::Object(outcome), self.source())
    }
}

/// Validation nodes scoped to the submitting step, in declaration order.
fn step_validations(ev: &Evaluator, submit_id: &NodeId) -> Vec<NodeId> {
    let Some(step) = ev.scope_entry(submit_id).and_then(|entry| entry.step) else {
        return vec![];
    };
    ev.nodes_of_kind(NodeKind::Validation)
        .into_iter()
        .filter(|validation| {
            ev.scope_entry(validation)
                .and_then(|entry| entry.step)
                .as_ref()
                == Some(&step)
        })
        .collect()
}

// =============================================================================
// ACTION
// =============================================================================

pub struct ActionHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for ActionHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "ActionHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Async
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        let cx = cx.with_transition("action");
        if let Some(when) = self.node.prop("when") {
            let gate = eval_prop(ev, &cx, when).await;
            if !gate.as_ref().is_some_and(is_truthy) {
                let mut outcome = Map::new();
                outcome.insert("performed".to_string(), Value::Bool(false));
                return ThunkResult::value(Value::Object(outcome), self.source());
            }
        }
        if let Err(error) = run_effects(ev, &cx, &self.node.node_list_prop("effects")).await {
            return ThunkResult::failure(error, self.source());
        }
        let mut outcome = Map::new();
        outcome.insert("performed".to_string(), Value::Bool(true));
        ThunkResult::value(Value::Object(outcome), self.source())
    }
}

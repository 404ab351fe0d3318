//! Predicate handlers: short-circuit boolean composition and condition
//! tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;

use crate::ast::{AstNode, FunctionType, NodeKind, PropValue};
use crate::error::{EngineError, ErrorKind};
use crate::eval::Evaluator;
use crate::eval::context::EvalContext;
use crate::eval::overlay::RuntimeHooks;
use crate::id::NodeId;

use super::{HandlerMode, ThunkHandler, ThunkResult, eval_prop, is_truthy};

pub fn handler_for(node: &AstNode) -> Arc<dyn ThunkHandler> {
    let node = node.clone();
    match node.kind {
        NodeKind::And => Arc::new(AndHandler { node }),
        NodeKind::Or => Arc::new(OrHandler { node }),
        NodeKind::Not => Arc::new(NotHandler { node }),
        NodeKind::Test => Arc::new(TestHandler { node }),
        other => unreachable!("not a predicate kind: {:?}", other),
    }
}

fn operands(node: &AstNode) -> &[PropValue] {
    match node.prop("operands") {
        Some(PropValue::List(items)) => items,
        _ => &[],
    }
}

/// Outcome of evaluating one operand: errors count as failures, which the
/// surrounding predicate maps onto falsy.
enum Operand {
    Truthy,
    Falsy,
    Failed,
}

async fn operand(ev: &Evaluator, cx: &EvalContext, prop: &PropValue) -> Operand {
    match prop {
        PropValue::Node(id) => {
            let result = ev.invoke(id, cx).await;
            if result.is_error() {
                Operand::Failed
            } else if result.value.as_ref().is_some_and(is_truthy) {
                Operand::Truthy
            } else {
                Operand::Falsy
            }
        }
        other => match eval_prop_sync_value(other) {
            Some(value) if is_truthy(&value) => Operand::Truthy,
            _ => Operand::Falsy,
        },
    }
}

fn operand_sync(ev: &Evaluator, cx: &EvalContext, prop: &PropValue) -> Operand {
    match prop {
        PropValue::Node(id) => {
            let result = ev.invoke_sync(id, cx);
            if result.is_error() {
                Operand::Failed
            } else if result.value.as_ref().is_some_and(is_truthy) {
                Operand::Truthy
            } else {
                Operand::Falsy
            }
        }
        other => match eval_prop_sync_value(other) {
            Some(value) if is_truthy(&value) => Operand::Truthy,
            _ => Operand::Falsy,
        },
    }
}

/// Literal operands carry their value directly.
fn eval_prop_sync_value(prop: &PropValue) -> Option<Value> {
    match prop {
        PropValue::Value(value) => Some(value.clone()),
        _ => None,
    }
}

// =============================================================================
// AND
// =============================================================================

/// Short-circuit conjunction. Empty operand list is true; a failed
/// operand makes the whole predicate false.
pub struct AndHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for AndHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "AndHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Hybrid
    }

    fn evaluate_sync(&self, cx: &EvalContext, ev: &Evaluator) -> ThunkResult {
        for prop in operands(&self.node) {
            match operand_sync(ev, cx, prop) {
                Operand::Truthy => continue,
                Operand::Falsy | Operand::Failed => {
                    return ThunkResult::value(Value::Bool(false), self.source());
                }
            }
        }
        ThunkResult::value(Value::Bool(true), self.source())
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        for prop in operands(&self.node) {
            match operand(ev, cx, prop).await {
                Operand::Truthy => continue,
                Operand::Falsy | Operand::Failed => {
                    return ThunkResult::value(Value::Bool(false), self.source());
                }
            }
        }
        ThunkResult::value(Value::Bool(true), self.source())
    }
}

// =============================================================================
// OR
// =============================================================================

/// Short-circuit disjunction. Empty operand list is false; failures do
/// not terminate the scan.
pub struct OrHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for OrHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "OrHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Hybrid
    }

    fn evaluate_sync(&self, cx: &EvalContext, ev: &Evaluator) -> ThunkResult {
        for prop in operands(&self.node) {
            if matches!(operand_sync(ev, cx, prop), Operand::Truthy) {
                return ThunkResult::value(Value::Bool(true), self.source());
            }
        }
        ThunkResult::value(Value::Bool(false), self.source())
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        for prop in operands(&self.node) {
            if matches!(operand(ev, cx, prop).await, Operand::Truthy) {
                return ThunkResult::value(Value::Bool(true), self.source());
            }
        }
        ThunkResult::value(Value::Bool(false), self.source())
    }
}

// =============================================================================
// NOT
// =============================================================================

pub struct NotHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for NotHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "NotHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Hybrid
    }

    fn evaluate_sync(&self, cx: &EvalContext, ev: &Evaluator) -> ThunkResult {
        let truthy = self
            .node
            .prop("operand")
            .map(|operand| match operand_sync(ev, cx, operand) {
                Operand::Truthy => true,
                Operand::Falsy | Operand::Failed => false,
            })
            .unwrap_or(false);
        ThunkResult::value(Value::Bool(!truthy), self.source())
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        let truthy = match self.node.prop("operand") {
            Some(prop) => matches!(operand(ev, cx, prop).await, Operand::Truthy),
            None => false,
        };
        ThunkResult::value(Value::Bool(!truthy), self.source())
    }
}

// =============================================================================
// TEST
// =============================================================================

/// Evaluates `subject`, resolves the condition function, and XORs the
/// outcome with `negate`.
pub struct TestHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for TestHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "TestHandler"
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
        let subject = match self.node.prop("subject") {
            Some(subject) => eval_prop(ev, cx, subject).await.unwrap_or(Value::Null),
            None => Value::Null,
        };

        let (name, extra_args) = match self.resolve_condition(ev, cx).await {
            Ok(resolved) => resolved,
            Err(error) => return ThunkResult::failure(error, self.source()),
        };

        let Some(function) = ev.functions().get(FunctionType::Condition, &name) else {
            return ThunkResult::failure(
                EngineError::new(
                    ErrorKind::UnknownFunction,
                    format!("no Condition function named '{}'", name),
                )
                .with_node(self.node.id.clone()),
                self.source(),
            );
        };

        let mut args = vec![subject];
        args.extend(extra_args);
        let function_cx = ev.function_context(FunctionType::Condition, cx);
        match function.call(&function_cx, args).await {
            Ok(outcome) => {
                let negate = self
                    .node
                    .prop("negate")
                    .and_then(PropValue::as_bool)
                    .unwrap_or(false);
                ThunkResult::value(Value::Bool(is_truthy(&outcome) ^ negate), self.source())
            }
            Err(message) => ThunkResult::failure(
                EngineError::evaluation(
                    format!("condition '{}' failed", name),
                    self.node.id.clone(),
                )
                .with_cause(message),
                self.source(),
            ),
        }
    }
}

impl TestHandler {
    /// The condition is a function name, a `Function.Condition` node whose
    /// arguments are appended after the subject, or an expression yielding
    /// a name.
    async fn resolve_condition(
        &self,
        ev: &Evaluator,
        cx: &EvalContext,
    ) -> Result<(String, Vec<Value>), EngineError> {
        match self.node.prop("condition") {
            Some(PropValue::Value(Value::String(name))) => Ok((name.clone(), vec![])),
            Some(PropValue::Node(condition_id)) => {
                let condition = ev.node(condition_id).and_then(|n| n.as_ast().cloned());
                match condition {
                    Some(ast) if matches!(ast.kind, NodeKind::Function(FunctionType::Condition)) => {
                        let name = ast
                            .string_prop("name")
                            .map(str::to_string)
                            .ok_or_else(|| {
                                EngineError::evaluation(
                                    "condition function has no name",
                                    condition_id.clone(),
                                )
                            })?;
                        let args = match ast.prop("arguments") {
                            Some(PropValue::List(items)) => {
                                join_all(items.iter().map(|item| eval_prop(ev, cx, item)))
                                    .await
                                    .into_iter()
                                    .map(|value| value.unwrap_or(Value::Null))
                                    .collect()
                            }
                            _ => vec![],
                        };
                        Ok((name, args))
                    }
                    _ => {
                        let value = ev.invoke(condition_id, cx).await.value;
                        match value {
                            Some(Value::String(name)) => Ok((name, vec![])),
                            _ => Err(EngineError::evaluation(
                                "condition did not resolve to a function name",
                                self.node.id.clone(),
                            )),
                        }
                    }
                }
            }
            _ => Err(EngineError::evaluation(
                "test has no usable condition",
                self.node.id.clone(),
            )),
        }
    }
}

//! Thunk handlers: one per node kind, resolved by node ID.
//!
//! Handlers never throw across the evaluator boundary: failures are
//! carried in `ThunkResult::error` and consumers decide how to react
//! (predicates treat errors as falsy, references as undefined,
//! transitions as blocking). A handler is `Sync`, `Async`, or `Hybrid`;
//! the evaluator picks the entry point at call time using the
//! dependency-derived `is_async` classification.

pub mod expressions;
pub mod predicates;
pub mod pseudo;
pub mod structures;
pub mod transitions;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::ast::{Node, NodeKind, PropValue};
use crate::error::EngineError;
use crate::eval::Evaluator;
use crate::eval::context::EvalContext;
use crate::eval::overlay::RuntimeHooks;
use crate::id::NodeId;
use crate::registry::{NodeRegistry, NodeView, RegistryError};

// =============================================================================
// RESULTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMeta {
    /// Handler kind that produced the result.
    pub source: String,
    pub timestamp_ms: u64,
}

impl ResultMeta {
    fn now(source: &str) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ResultMeta {
            source: source.to_string(),
            timestamp_ms,
        }
    }
}

/// The memoized outcome of evaluating one node. `value: None` models the
/// absent/undefined result (distinct from an explicit JSON null).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThunkResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
    pub metadata: ResultMeta,
}

impl ThunkResult {
    pub fn value(value: Value, source: &str) -> Self {
        ThunkResult {
            value: Some(value),
            error: None,
            metadata: ResultMeta::now(source),
        }
    }

    pub fn of(value: Option<Value>, source: &str) -> Self {
        ThunkResult {
            value,
            error: None,
            metadata: ResultMeta::now(source),
        }
    }

    pub fn undefined(source: &str) -> Self {
        ThunkResult::of(None, source)
    }

    pub fn failure(error: EngineError, source: &str) -> Self {
        log::warn!("handler error from {}: {}", source, error);
        ThunkResult {
            value: None,
            error: Some(error),
            metadata: ResultMeta::now(source),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// =============================================================================
// HANDLER TRAIT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    Sync,
    Async,
    /// Sync unless some dependency is async.
    Hybrid,
}

#[async_trait]
pub trait ThunkHandler: Send + Sync {
    fn node_id(&self) -> &NodeId;

    fn source(&self) -> &'static str;

    fn mode(&self) -> HandlerMode;

    /// Synchronous entry point. Only called when the evaluator classified
    /// the node as sync.
    fn evaluate_sync(&self, _cx: &EvalContext, _ev: &Evaluator) -> ThunkResult {
        ThunkResult::failure(
            EngineError::evaluation(
                "handler has no synchronous entry point",
                self.node_id().clone(),
            ),
            self.source(),
        )
    }

    /// Asynchronous entry point. Defaults to the sync branch for handlers
    /// that never suspend.
    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        self.evaluate_sync(cx, ev)
    }
}

// =============================================================================
// HANDLER REGISTRY
// =============================================================================

/// id → handler. The compiled program owns one; each runtime overlay owns
/// a delta for nodes registered during evaluation.
#[derive(Default)]
pub struct ThunkHandlerRegistry {
    handlers: HashMap<NodeId, Arc<dyn ThunkHandler>>,
}

impl std::fmt::Debug for ThunkHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThunkHandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ThunkHandlerRegistry {
    pub fn new() -> Self {
        ThunkHandlerRegistry::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ThunkHandler>) -> Result<(), RegistryError> {
        let id = handler.node_id().clone();
        if self.handlers.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        self.handlers.insert(id, handler);
        Ok(())
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<dyn ThunkHandler>> {
        self.handlers.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Build the handler for one registered node.
pub fn handler_for(node: &Node, nodes: NodeView<'_>) -> Arc<dyn ThunkHandler> {
    match node {
        Node::Pseudo(pseudo_node) => pseudo::handler_for(pseudo_node, nodes),
        Node::Ast(ast) => match ast.kind {
            NodeKind::Journey | NodeKind::Step | NodeKind::Block => {
                structures::handler_for(ast)
            }
            NodeKind::Reference
            | NodeKind::Format
            | NodeKind::Next
            | NodeKind::Iterate
            | NodeKind::Validation
            | NodeKind::Function(_) => expressions::handler_for(ast),
            NodeKind::And | NodeKind::Or | NodeKind::Not | NodeKind::Test => {
                predicates::handler_for(ast)
            }
            NodeKind::Load | NodeKind::Access | NodeKind::Submit | NodeKind::Action => {
                transitions::handler_for(ast)
            }
        },
    }
}

/// Build the compiled program's handler registry.
pub fn build_registry(registry: &NodeRegistry) -> Result<ThunkHandlerRegistry, RegistryError> {
    let view = NodeView::base_only(registry);
    let mut handlers = ThunkHandlerRegistry::new();
    for node in registry.iter() {
        handlers.register(handler_for(node, view))?;
    }
    Ok(handlers)
}

// =============================================================================
// SHARED EVALUATION HELPERS
// =============================================================================

/// JavaScript-style truthiness: null, false, 0, NaN, and "" are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Evaluate one property value. Child errors collapse to undefined;
/// list elements evaluate concurrently.
pub(crate) fn eval_prop<'a>(
    ev: &'a Evaluator,
    cx: &'a EvalContext,
    prop: &'a PropValue,
) -> BoxFuture<'a, Option<Value>> {
    async move {
        match prop {
            PropValue::Value(value) => Some(value.clone()),
            PropValue::Node(id) => ev.invoke(id, cx).await.value,
            PropValue::List(items) => {
                let evaluated =
                    join_all(items.iter().map(|item| eval_prop(ev, cx, item))).await;
                Some(Value::Array(
                    evaluated
                        .into_iter()
                        .map(|value| value.unwrap_or(Value::Null))
                        .collect(),
                ))
            }
            PropValue::Map(entries) => {
                let evaluated = join_all(
                    entries
                        .iter()
                        .map(|(name, value)| async move {
                            (name.clone(), eval_prop(ev, cx, value).await)
                        }),
                )
                .await;
                let mut object = Map::new();
                for (name, value) in evaluated {
                    object.insert(name, value.unwrap_or(Value::Null));
                }
                Some(Value::Object(object))
            }
        }
    }
    .boxed()
}

/// Synchronous mirror of [`eval_prop`], used on the sync fast path.
pub(crate) fn eval_prop_sync(
    ev: &Evaluator,
    cx: &EvalContext,
    prop: &PropValue,
) -> Option<Value> {
    match prop {
        PropValue::Value(value) => Some(value.clone()),
        PropValue::Node(id) => ev.invoke_sync(id, cx).value,
        PropValue::List(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| eval_prop_sync(ev, cx, item).unwrap_or(Value::Null))
                .collect(),
        )),
        PropValue::Map(entries) => {
            let mut object = Map::new();
            for (name, value) in entries {
                object.insert(
                    name.clone(),
                    eval_prop_sync(ev, cx, value).unwrap_or(Value::Null),
                );
            }
            Some(Value::Object(object))
        }
    }
}

/// Invoke `Next` outcomes in order; the first defined value wins.
pub(crate) async fn first_match(
    ev: &Evaluator,
    cx: &EvalContext,
    outcomes: &[NodeId],
) -> Option<Value> {
    for outcome in outcomes {
        let result = ev.invoke(outcome, cx).await;
        if let Some(value) = result.value {
            return Some(value);
        }
    }
    None
}

/// Run effect nodes in order; the first error blocks the transition.
pub(crate) async fn run_effects(
    ev: &Evaluator,
    cx: &EvalContext,
    effects: &[NodeId],
) -> Result<(), EngineError> {
    for effect in effects {
        let result = ev.invoke(effect, cx).await;
        if let Some(error) = result.error {
            return Err(error);
        }
    }
    Ok(())
}

//! Structure handlers: journeys, steps, and blocks render themselves by
//! evaluating their declared properties into a result record.
//!
//! Transition properties are never evaluated here; the lifecycle
//! coordinator runs them. Off-path structures evaluate only their
//! navigational surface.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{Map, Value, json};

use crate::ast::{AstNode, FunctionType, NodeKind, PropValue};
use crate::eval::Evaluator;
use crate::eval::context::EvalContext;
use crate::eval::overlay::RuntimeHooks;
use crate::id::NodeId;

use super::{HandlerMode, ThunkHandler, ThunkResult, eval_prop, is_truthy};

pub fn handler_for(node: &AstNode) -> Arc<dyn ThunkHandler> {
    let node = node.clone();
    match node.kind {
        NodeKind::Journey => Arc::new(JourneyHandler { node }),
        NodeKind::Step => Arc::new(StepHandler { node }),
        NodeKind::Block => Arc::new(BlockHandler { node }),
        other => unreachable!("not a structure kind: {:?}", other),
    }
}

/// Evaluate the properties admitted by `keep` into an object, concurrently.
async fn evaluate_properties(
    ev: &Evaluator,
    cx: &EvalContext,
    node: &AstNode,
    keep: impl Fn(&str) -> bool,
) -> Map<String, Value> {
    let admitted: Vec<(&String, &PropValue)> = node
        .properties
        .iter()
        .filter(|(name, _)| keep(name))
        .collect();
    let evaluated = join_all(
        admitted
            .iter()
            .map(|(name, prop)| async move { ((*name).clone(), eval_prop(ev, cx, prop).await) }),
    )
    .await;

    let mut object = Map::new();
    for (name, value) in evaluated {
        if let Some(value) = value {
            object.insert(name, value);
        }
    }
    object
}

fn record(node: &AstNode, properties: Map<String, Value>) -> Value {
    json!({
        "id": node.id.to_string(),
        "kind": node.kind.discriminator(),
        "properties": properties,
    })
}

// =============================================================================
// JOURNEY
// =============================================================================

const JOURNEY_STRUCTURAL_PROPS: &[&str] = &[
    "code",
    "path",
    "title",
    "description",
    "children",
    "steps",
    "metadata",
];

pub struct JourneyHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for JourneyHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "JourneyHandler"
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
        let transition_props = self.node.kind.transition_properties();
        let on_step_path = ev.metadata_flag(&self.node.id, "isAncestorOfStep");
        let properties = if on_step_path {
            evaluate_properties(ev, cx, &self.node, |name| {
                !transition_props.contains(&name)
            })
            .await
        } else {
            evaluate_properties(ev, cx, &self.node, |name| {
                JOURNEY_STRUCTURAL_PROPS.contains(&name)
            })
            .await
        };
        ThunkResult::value(record(&self.node, properties), self.source())
    }
}

// =============================================================================
// STEP
// =============================================================================

const STEP_NAVIGATIONAL_PROPS: &[&str] = &[
    "path",
    "title",
    "isEntryPoint",
    "description",
    "blocks",
    "metadata",
];

pub struct StepHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for StepHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "StepHandler"
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
        let transition_props = self.node.kind.transition_properties();
        let on_step_path = ev.metadata_flag(&self.node.id, "isCurrentStep")
            || ev.metadata_flag(&self.node.id, "isAncestorOfStep");
        let properties = if on_step_path {
            evaluate_properties(ev, cx, &self.node, |name| {
                !transition_props.contains(&name)
            })
            .await
        } else {
            evaluate_properties(ev, cx, &self.node, |name| {
                STEP_NAVIGATIONAL_PROPS.contains(&name)
            })
            .await
        };
        ThunkResult::value(record(&self.node, properties), self.source())
    }
}

// =============================================================================
// BLOCK / FIELD
// =============================================================================

pub struct BlockHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for BlockHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        if self.node.is_field_block() {
            "FieldHandler"
        } else {
            "BlockHandler"
        }
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
        if !self.node.is_field_block() {
            let properties = evaluate_properties(ev, cx, &self.node, |_| true).await;
            return ThunkResult::value(record(&self.node, properties), self.source());
        }

        // Fields: a falsy `dependent` suppresses the captured value.
        let dependent_ok = match self.node.prop("dependent") {
            Some(dependent) => eval_prop(ev, cx, dependent)
                .await
                .as_ref()
                .is_some_and(is_truthy),
            None => true,
        };

        let mut properties = evaluate_properties(ev, cx, &self.node, |name| {
            name != "formatters" && (dependent_ok || name != "value")
        })
        .await;

        if dependent_ok {
            if let Some(value) = properties.remove("value") {
                let formatted = self.apply_formatters(ev, cx, value).await;
                properties.insert("value".to_string(), formatted);
            }
        }
        ThunkResult::value(record(&self.node, properties), self.source())
    }
}

impl BlockHandler {
    /// Run the field's transformer chain over its captured value. A
    /// formatter that fails leaves the value unchanged.
    async fn apply_formatters(&self, ev: &Evaluator, cx: &EvalContext, value: Value) -> Value {
        let formatters = self.node.node_list_prop("formatters");
        let mut current = value;
        for formatter_id in formatters {
            let Some(formatter) = ev.node(&formatter_id).and_then(|n| n.as_ast().cloned()) else {
                continue;
            };
            let Some(name) = formatter.string_prop("name").map(str::to_string) else {
                continue;
            };
            let mut args = vec![current.clone()];
            if let Some(PropValue::List(items)) = formatter.prop("arguments") {
                for item in items {
                    args.push(eval_prop(ev, cx, item).await.unwrap_or(Value::Null));
                }
            }
            let Some(function) = ev.functions().get(FunctionType::Transformer, &name) else {
                log::warn!("field formatter '{}' is not registered", name);
                continue;
            };
            let function_cx = ev.function_context(FunctionType::Transformer, cx);
            match function.call(&function_cx, args).await {
                Ok(next) => current = next,
                Err(message) => {
                    log::warn!("field formatter '{}' failed: {}", name, message);
                }
            }
        }
        current
    }
}

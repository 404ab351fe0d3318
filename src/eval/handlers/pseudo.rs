//! Pseudo-node handlers: the bridge between references and request data.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::ast::{PropValue, PseudoKind, PseudoNode};
use crate::error::{EngineError, ErrorKind};
use crate::eval::Evaluator;
use crate::eval::context::EvalContext;
use crate::eval::overlay::RuntimeHooks;
use crate::id::NodeId;
use crate::registry::NodeView;

use super::{HandlerMode, ThunkHandler, ThunkResult, is_truthy};

/// Allowlist check applied before any request map is indexed with an
/// externally influenced key.
pub fn is_safe_property_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn unsafe_key_failure(id: &NodeId, key: &str, source: &str) -> ThunkResult {
    ThunkResult::failure(
        EngineError::new(
            ErrorKind::SecurityViolation,
            format!("unsafe property key '{}'", key),
        )
        .with_node(id.clone()),
        source,
    )
}

/// How a field's `multiple` property resolves for post extraction.
#[derive(Debug, Clone)]
enum MultipleSpec {
    Absent,
    Literal(bool),
    Expr(NodeId),
}

impl MultipleSpec {
    fn capture(field: Option<&NodeId>, nodes: NodeView<'_>) -> MultipleSpec {
        let Some(field) = field.and_then(|id| nodes.ast(id)) else {
            return MultipleSpec::Absent;
        };
        match field.prop("multiple") {
            Some(PropValue::Value(Value::Bool(b))) => MultipleSpec::Literal(*b),
            Some(PropValue::Node(id)) => MultipleSpec::Expr(id.clone()),
            _ => MultipleSpec::Absent,
        }
    }

    fn is_expression(&self) -> bool {
        matches!(self, MultipleSpec::Expr(_))
    }

    fn resolve_sync(&self, ev: &Evaluator, cx: &EvalContext) -> bool {
        match self {
            MultipleSpec::Absent => false,
            MultipleSpec::Literal(b) => *b,
            MultipleSpec::Expr(id) => ev
                .invoke_sync(id, cx)
                .value
                .as_ref()
                .is_some_and(is_truthy),
        }
    }

    async fn resolve(&self, ev: &Evaluator, cx: &EvalContext) -> bool {
        match self {
            MultipleSpec::Expr(id) => {
                ev.invoke(id, cx).await.value.as_ref().is_some_and(is_truthy)
            }
            other => other.resolve_sync(ev, cx),
        }
    }
}

/// Scalar extraction: for list values, the first non-empty trimmed
/// element; scalars pass through.
fn post_scalar(raw: Option<&Value>) -> Option<Value> {
    match raw? {
        Value::Array(items) => items.iter().find_map(|item| {
            let trimmed = item.as_str()?.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(Value::String(trimmed.to_string()))
            }
        }),
        scalar => Some(scalar.clone()),
    }
}

/// Multi-valued extraction: scalars are wrapped, null becomes empty.
fn post_multi(raw: Option<&Value>) -> Value {
    match raw {
        None | Some(Value::Null) => Value::Array(vec![]),
        Some(Value::Array(items)) => Value::Array(items.clone()),
        Some(scalar) => Value::Array(vec![scalar.clone()]),
    }
}

// =============================================================================
// POST
// =============================================================================

pub struct PostHandler {
    id: NodeId,
    base: String,
    multiple: MultipleSpec,
}

impl PostHandler {
    fn extract(&self, cx: &EvalContext, multiple: bool) -> ThunkResult {
        let raw = cx.request.post.get(&self.base);
        if multiple {
            ThunkResult::value(post_multi(raw), self.source())
        } else {
            ThunkResult::of(post_scalar(raw), self.source())
        }
    }
}

#[async_trait]
impl ThunkHandler for PostHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn source(&self) -> &'static str {
        "PostHandler"
    }

    fn mode(&self) -> HandlerMode {
        if self.multiple.is_expression() {
            HandlerMode::Hybrid
        } else {
            HandlerMode::Sync
        }
    }

    fn evaluate_sync(&self, cx: &EvalContext, ev: &Evaluator) -> ThunkResult {
        if !is_safe_property_key(&self.base) {
            return unsafe_key_failure(&self.id, &self.base, self.source());
        }
        self.extract(cx, self.multiple.resolve_sync(ev, cx))
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        if !is_safe_property_key(&self.base) {
            return unsafe_key_failure(&self.id, &self.base, self.source());
        }
        self.extract(cx, self.multiple.resolve(ev, cx).await)
    }
}

// =============================================================================
// QUERY / PARAMS
// =============================================================================

pub struct QueryHandler {
    id: NodeId,
    name: String,
}

#[async_trait]
impl ThunkHandler for QueryHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn source(&self) -> &'static str {
        "QueryHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Sync
    }

    fn evaluate_sync(&self, cx: &EvalContext, _ev: &Evaluator) -> ThunkResult {
        if !is_safe_property_key(&self.name) {
            return unsafe_key_failure(&self.id, &self.name, self.source());
        }
        ThunkResult::of(cx.request.query.get(&self.name).cloned(), self.source())
    }
}

pub struct ParamsHandler {
    id: NodeId,
    name: String,
}

#[async_trait]
impl ThunkHandler for ParamsHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn source(&self) -> &'static str {
        "ParamsHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Sync
    }

    fn evaluate_sync(&self, cx: &EvalContext, _ev: &Evaluator) -> ThunkResult {
        if !is_safe_property_key(&self.name) {
            return unsafe_key_failure(&self.id, &self.name, self.source());
        }
        ThunkResult::of(
            cx.request
                .params
                .get(&self.name)
                .map(|value| Value::String(value.clone())),
            self.source(),
        )
    }
}

// =============================================================================
// DATA
// =============================================================================

pub struct DataHandler {
    id: NodeId,
    base: String,
}

#[async_trait]
impl ThunkHandler for DataHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn source(&self) -> &'static str {
        "DataHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Sync
    }

    fn evaluate_sync(&self, cx: &EvalContext, ev: &Evaluator) -> ThunkResult {
        if !is_safe_property_key(&self.base) {
            return unsafe_key_failure(&self.id, &self.base, self.source());
        }
        ThunkResult::of(ev.request_data(cx, &self.base), self.source())
    }
}

// =============================================================================
// ANSWER
// =============================================================================

/// Reads a field answer: the in-flight post value when the request carries
/// one, otherwise the answer persisted in the session.
pub struct AnswerHandler {
    id: NodeId,
    base: String,
    multiple: MultipleSpec,
}

impl AnswerHandler {
    fn read(&self, cx: &EvalContext, multiple: bool) -> Option<Value> {
        if cx.request.post.contains_key(&self.base) {
            let raw = cx.request.post.get(&self.base);
            return if multiple {
                Some(post_multi(raw))
            } else {
                post_scalar(raw)
            };
        }
        cx.request
            .metadata
            .session
            .get("answers")
            .and_then(|answers| answers.get(&self.base))
            .cloned()
    }
}

#[async_trait]
impl ThunkHandler for AnswerHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn source(&self) -> &'static str {
        "AnswerHandler"
    }

    fn mode(&self) -> HandlerMode {
        if self.multiple.is_expression() {
            HandlerMode::Hybrid
        } else {
            HandlerMode::Sync
        }
    }

    fn evaluate_sync(&self, cx: &EvalContext, ev: &Evaluator) -> ThunkResult {
        if !is_safe_property_key(&self.base) {
            return unsafe_key_failure(&self.id, &self.base, self.source());
        }
        ThunkResult::of(self.read(cx, self.multiple.resolve_sync(ev, cx)), self.source())
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        if !is_safe_property_key(&self.base) {
            return unsafe_key_failure(&self.id, &self.base, self.source());
        }
        ThunkResult::of(
            self.read(cx, self.multiple.resolve(ev, cx).await),
            self.source(),
        )
    }
}

// =============================================================================
// ANSWER REMOTE
// =============================================================================

/// Runtime-only: inside a collection iteration, answers come from the
/// current `@item` scope element.
pub struct AnswerRemoteHandler {
    id: NodeId,
    base: String,
}

#[async_trait]
impl ThunkHandler for AnswerRemoteHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn source(&self) -> &'static str {
        "AnswerRemoteHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Sync
    }

    fn evaluate_sync(&self, cx: &EvalContext, _ev: &Evaluator) -> ThunkResult {
        if !is_safe_property_key(&self.base) {
            return unsafe_key_failure(&self.id, &self.base, self.source());
        }
        let value = cx
            .scope
            .lookup("@item")
            .and_then(|item| item.get(&self.base).cloned());
        ThunkResult::of(value, self.source())
    }
}

// =============================================================================
// FACTORY
// =============================================================================

pub fn handler_for(pseudo: &PseudoNode, nodes: NodeView<'_>) -> Arc<dyn ThunkHandler> {
    let id = pseudo.id.clone();
    let base = pseudo.base.clone();
    match pseudo.kind {
        PseudoKind::Post => Arc::new(PostHandler {
            id,
            base,
            multiple: MultipleSpec::capture(pseudo.field_node.as_ref(), nodes),
        }),
        PseudoKind::Query => Arc::new(QueryHandler { id, name: base }),
        PseudoKind::Params => Arc::new(ParamsHandler { id, name: base }),
        PseudoKind::Data => Arc::new(DataHandler { id, base }),
        PseudoKind::Answer => Arc::new(AnswerHandler {
            id,
            base,
            multiple: MultipleSpec::capture(pseudo.field_node.as_ref(), nodes),
        }),
        PseudoKind::AnswerRemote => Arc::new(AnswerRemoteHandler { id, base }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_key_allowlist() {
        assert!(is_safe_property_key("email"));
        assert!(is_safe_property_key("field_1-b"));
        assert!(!is_safe_property_key(""));
        assert!(!is_safe_property_key("__proto__.x"));
        assert!(!is_safe_property_key("a b"));
    }

    #[test]
    fn post_scalar_takes_first_non_empty_trimmed() {
        let raw = serde_json::json!(["  ", "", "  a@b  ", "c"]);
        assert_eq!(
            post_scalar(Some(&raw)),
            Some(Value::String("a@b".to_string()))
        );
        assert_eq!(post_scalar(Some(&serde_json::json!("x"))), Some(serde_json::json!("x")));
        assert_eq!(post_scalar(None), None);
    }

    #[test]
    fn post_multi_wraps_and_empties() {
        assert_eq!(post_multi(None), serde_json::json!([]));
        assert_eq!(post_multi(Some(&Value::Null)), serde_json::json!([]));
        assert_eq!(post_multi(Some(&serde_json::json!("x"))), serde_json::json!(["x"]));
    }
}

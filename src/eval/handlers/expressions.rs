//! Expression handlers: references, formats, navigation outcomes,
//! function calls, validation rules, and collection iteration.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{Map, Value, json};

use crate::ast::{AstNode, FunctionType, NodeKind, PropValue, PseudoKind};
use crate::error::{EngineError, ErrorKind};
use crate::eval::Evaluator;
use crate::eval::context::EvalContext;
use crate::eval::overlay::RuntimeHooks;
use crate::graph::EdgeData;
use crate::id::NodeId;

use super::{HandlerMode, ThunkHandler, ThunkResult, eval_prop, eval_prop_sync, is_truthy};

pub fn handler_for(node: &AstNode) -> Arc<dyn ThunkHandler> {
    let node = node.clone();
    match node.kind {
        NodeKind::Reference => Arc::new(ReferenceHandler { node }),
        NodeKind::Format => Arc::new(FormatHandler { node }),
        NodeKind::Next => Arc::new(NextHandler { node }),
        NodeKind::Iterate => Arc::new(IterateHandler { node }),
        NodeKind::Validation => Arc::new(ValidationHandler { node }),
        NodeKind::Function(function_type) => Arc::new(FunctionHandler {
            node,
            function_type,
        }),
        other => unreachable!("not an expression kind: {:?}", other),
    }
}

// =============================================================================
// REFERENCE
// =============================================================================

pub struct ReferenceHandler {
    node: AstNode,
}

impl ReferenceHandler {
    fn segments(&self) -> &[PropValue] {
        match self.node.prop("path") {
            Some(PropValue::List(segments)) => segments,
            _ => &[],
        }
    }
}

fn segment_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One property/index access step. Missing segments yield `None`.
fn access(value: &Value, key: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => segment_key(key).and_then(|k| map.get(&k).cloned()),
        Value::Array(items) => {
            let index = match key {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse::<u64>().ok(),
                _ => None,
            }?;
            items.get(index as usize).cloned()
        }
        _ => None,
    }
}

fn walk(mut current: Option<Value>, segments: &[Option<Value>]) -> Option<Value> {
    for segment in segments {
        let (value, key) = match (current, segment) {
            (Some(value), Some(key)) => (value, key),
            _ => return None,
        };
        current = access(&value, key);
    }
    current
}

#[async_trait]
impl ThunkHandler for ReferenceHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "ReferenceHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Hybrid
    }

    fn evaluate_sync(&self, cx: &EvalContext, ev: &Evaluator) -> ThunkResult {
        let segments = self.segments();
        let values: Vec<Option<Value>> = segments
            .iter()
            .map(|segment| eval_prop_sync(ev, cx, segment))
            .collect();
        let value = resolve_reference_sync(ev, cx, &self.node.id, &values);
        ThunkResult::of(value, self.source())
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        let segments = self.segments();
        let values: Vec<Option<Value>> =
            join_all(segments.iter().map(|segment| eval_prop(ev, cx, segment))).await;
        let value = resolve_reference(ev, cx, &self.node.id, &values).await;
        ThunkResult::of(value, self.source())
    }
}

fn reference_parts(values: &[Option<Value>]) -> Option<(String, String)> {
    let root = values.first()?.as_ref()?.as_str()?.to_string();
    let base = values
        .get(1)
        .and_then(|v| v.as_ref())
        .and_then(segment_key)
        .unwrap_or_default();
    Some((root, base))
}

/// The wired producer wins (inside an iteration that is the runtime
/// `AnswerRemote` layer); a name lookup and finally a direct request read
/// cover references whose base is dynamic.
fn producer_of(
    ev: &Evaluator,
    reference: &NodeId,
    kind: PseudoKind,
    base: &str,
) -> Option<NodeId> {
    ev.producer_pseudo_of(reference)
        .or_else(|| ev.pseudo_for(kind, base).map(|pseudo| pseudo.id))
}

async fn resolve_reference(
    ev: &Evaluator,
    cx: &EvalContext,
    reference: &NodeId,
    values: &[Option<Value>],
) -> Option<Value> {
    let (root, base) = reference_parts(values)?;
    match root.as_str() {
        "item" => walk(cx.scope.lookup("@item"), &values[1..]),
        "self" => walk(cx.scope.lookup("@self"), &values[1..]),
        external => {
            let kind = PseudoKind::from_path_root(external)?;
            let root_value = match producer_of(ev, reference, kind, &base) {
                Some(pseudo) => ev.invoke(&pseudo, cx).await.value,
                None => ev.direct_source_read(cx, kind, &base),
            };
            walk(root_value, values.get(2..).unwrap_or(&[]))
        }
    }
}

fn resolve_reference_sync(
    ev: &Evaluator,
    cx: &EvalContext,
    reference: &NodeId,
    values: &[Option<Value>],
) -> Option<Value> {
    let (root, base) = reference_parts(values)?;
    match root.as_str() {
        "item" => walk(cx.scope.lookup("@item"), &values[1..]),
        "self" => walk(cx.scope.lookup("@self"), &values[1..]),
        external => {
            let kind = PseudoKind::from_path_root(external)?;
            let root_value = match producer_of(ev, reference, kind, &base) {
                Some(pseudo) => ev.invoke_sync(&pseudo, cx).value,
                None => ev.direct_source_read(cx, kind, &base),
            };
            walk(root_value, values.get(2..).unwrap_or(&[]))
        }
    }
}

// =============================================================================
// FORMAT
// =============================================================================

pub struct FormatHandler {
    node: AstNode,
}

fn render_argument(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `%N` substitution, 1-based. Higher indices substitute first so `%12`
/// is never clobbered by `%1`.
fn substitute(template: &str, arguments: &[Option<Value>]) -> String {
    let mut output = template.to_string();
    for (index, argument) in arguments.iter().enumerate().rev() {
        let placeholder = format!("%{}", index + 1);
        let rendered = argument.as_ref().map(render_argument).unwrap_or_default();
        output = output.replace(&placeholder, &rendered);
    }
    output
}

#[async_trait]
impl ThunkHandler for FormatHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "FormatHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Hybrid
    }

    fn evaluate_sync(&self, cx: &EvalContext, ev: &Evaluator) -> ThunkResult {
        let Some(template) = self.node.string_prop("template") else {
            return ThunkResult::failure(
                EngineError::evaluation("format template must be a string", self.node.id.clone()),
                self.source(),
            );
        };
        let arguments: Vec<Option<Value>> = match self.node.prop("arguments") {
            Some(PropValue::List(items)) => items
                .iter()
                .map(|item| eval_prop_sync(ev, cx, item))
                .collect(),
            _ => vec![],
        };
        ThunkResult::value(Value::String(substitute(template, &arguments)), self.source())
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        let Some(template) = self.node.string_prop("template") else {
            return ThunkResult::failure(
                EngineError::evaluation("format template must be a string", self.node.id.clone()),
                self.source(),
            );
        };
        let arguments: Vec<Option<Value>> = match self.node.prop("arguments") {
            Some(PropValue::List(items)) => {
                join_all(items.iter().map(|item| eval_prop(ev, cx, item))).await
            }
            _ => vec![],
        };
        ThunkResult::value(Value::String(substitute(template, &arguments)), self.source())
    }
}

// =============================================================================
// FUNCTION
// =============================================================================

pub struct FunctionHandler {
    node: AstNode,
    function_type: FunctionType,
}

#[async_trait]
impl ThunkHandler for FunctionHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        match self.function_type {
            FunctionType::Condition => "ConditionFunctionHandler",
            FunctionType::Transformer => "TransformerFunctionHandler",
            FunctionType::Effect => "EffectFunctionHandler",
            FunctionType::Generator => "GeneratorFunctionHandler",
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
        let Some(name) = self.node.string_prop("name") else {
            return ThunkResult::failure(
                EngineError::evaluation("function node has no name", self.node.id.clone()),
                self.source(),
            );
        };
        let arguments = match self.node.prop("arguments") {
            Some(PropValue::List(items)) => {
                join_all(items.iter().map(|item| eval_prop(ev, cx, item)))
                    .await
                    .into_iter()
                    .map(|value| value.unwrap_or(Value::Null))
                    .collect()
            }
            _ => vec![],
        };
        let Some(function) = ev.functions().get(self.function_type, name) else {
            return ThunkResult::failure(
                EngineError::new(
                    ErrorKind::UnknownFunction,
                    format!("no {} function named '{}'", self.function_type.as_str(), name),
                )
                .with_node(self.node.id.clone()),
                self.source(),
            );
        };
        let function_cx = ev.function_context(self.function_type, cx);
        match function.call(&function_cx, arguments).await {
            Ok(value) => ThunkResult::value(value, self.source()),
            Err(message) => ThunkResult::failure(
                EngineError::evaluation(
                    format!("function '{}' failed", name),
                    self.node.id.clone(),
                )
                .with_cause(message),
                self.source(),
            ),
        }
    }
}

// =============================================================================
// NEXT
// =============================================================================

pub struct NextHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for NextHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "NextHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Hybrid
    }

    fn evaluate_sync(&self, cx: &EvalContext, ev: &Evaluator) -> ThunkResult {
        if let Some(when) = self.node.prop("when") {
            let gate = eval_prop_sync(ev, cx, when);
            if !gate.as_ref().is_some_and(is_truthy) {
                return ThunkResult::undefined(self.source());
            }
        }
        let goto = self
            .node
            .prop("goto")
            .and_then(|goto| eval_prop_sync(ev, cx, goto));
        ThunkResult::of(goto, self.source())
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        _hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        if let Some(when) = self.node.prop("when") {
            let gate = eval_prop(ev, cx, when).await;
            if !gate.as_ref().is_some_and(is_truthy) {
                return ThunkResult::undefined(self.source());
            }
        }
        let goto = match self.node.prop("goto") {
            Some(goto) => eval_prop(ev, cx, goto).await,
            None => None,
        };
        ThunkResult::of(goto, self.source())
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

pub struct ValidationHandler {
    node: AstNode,
}

#[async_trait]
impl ThunkHandler for ValidationHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "ValidationHandler"
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
        let submission_only = self
            .node
            .prop("submissionOnly")
            .and_then(PropValue::as_bool)
            .unwrap_or(false);
        if submission_only && cx.transition_type().as_deref() != Some("submission") {
            return ThunkResult::undefined(self.source());
        }

        let failed = match self.node.prop("when") {
            Some(when) => eval_prop(ev, cx, when).await.is_some_and(|v| is_truthy(&v)),
            None => false,
        };
        if !failed {
            return ThunkResult::undefined(self.source());
        }

        let message = match self.node.prop("message") {
            Some(message) => eval_prop(ev, cx, message).await.unwrap_or(Value::Null),
            None => Value::Null,
        };
        let mut record = Map::new();
        record.insert("message".to_string(), message);
        if let Some(details) = self.node.prop("details") {
            if let Some(details) = eval_prop(ev, cx, details).await {
                record.insert("details".to_string(), details);
            }
        }
        if let Some(field_code) = owning_field_code(ev, &self.node.id) {
            record.insert("fieldCode".to_string(), Value::String(field_code));
        }
        record.insert(
            "nodeId".to_string(),
            Value::String(self.node.id.to_string()),
        );
        ThunkResult::value(Value::Object(record), self.source())
    }
}

fn owning_field_code(ev: &Evaluator, id: &NodeId) -> Option<String> {
    let entry = ev.scope_entry(id)?;
    entry.chain.iter().rev().find_map(|ancestor| {
        let node = ev.node(ancestor)?;
        let ast = node.as_ast()?;
        if ast.is_field_block() {
            ast.string_prop("code").map(str::to_string)
        } else {
            None
        }
    })
}

// =============================================================================
// ITERATE
// =============================================================================

pub struct IterateHandler {
    node: AstNode,
}

fn as_sequence(value: Option<Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => vec![],
        Some(Value::Array(items)) => items,
        Some(single) => vec![single],
    }
}

#[async_trait]
impl ThunkHandler for IterateHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn source(&self) -> &'static str {
        "IterateHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Async
    }

    async fn evaluate(
        &self,
        cx: &EvalContext,
        ev: &Evaluator,
        hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        let Some(input) = self.node.prop("input") else {
            return ThunkResult::undefined(self.source());
        };
        let elements = as_sequence(eval_prop(ev, cx, input).await);
        let source_pseudo = input
            .as_node()
            .and_then(|input_id| ev.producer_pseudo_of(input_id));
        let Some(template) = self.node.prop("iterator") else {
            return ThunkResult::undefined(self.source());
        };

        let mut yielded = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            let cloned = match hooks.transform_value(template) {
                Ok(cloned) => cloned,
                Err(error) => return ThunkResult::failure(error, self.source()),
            };

            // Per-element answers resolve against the iteration scope, not
            // the request, via runtime AnswerRemote pseudo-nodes.
            for code in field_codes_in(ev, &cloned) {
                match hooks.ensure_answer_remote(&code) {
                    Ok(remote) => {
                        if let Some(source) = &source_pseudo {
                            hooks.add_edge(
                                source,
                                &remote,
                                EdgeData::data_flow("input")
                                    .with_reference(PseudoKind::AnswerRemote, code.clone()),
                            );
                        }
                    }
                    Err(error) => return ThunkResult::failure(error, self.source()),
                }
            }
            hooks.register_runtime_nodes_batch();

            let mut frame = BTreeMap::new();
            frame.insert("@item".to_string(), element);
            frame.insert("@index".to_string(), json!(index));
            let element_cx = cx.with_frame(frame);
            let value = eval_prop(ev, &element_cx, &cloned).await;
            yielded.push(value.unwrap_or(Value::Null));
        }
        ThunkResult::value(Value::Array(yielded), self.source())
    }
}

/// Literal field codes declared by field blocks inside a cloned template.
fn field_codes_in(ev: &Evaluator, template: &PropValue) -> Vec<String> {
    let mut roots = Vec::new();
    template.collect_node_ids(&mut roots);
    let mut codes = Vec::new();
    while let Some(id) = roots.pop() {
        let Some(node) = ev.node(&id) else {
            continue;
        };
        let Some(ast) = node.as_ast() else {
            continue;
        };
        roots.extend(ast.child_ids());
        if ast.is_field_block() {
            if let Some(code) = ast.string_prop("code") {
                if !codes.contains(&code.to_string()) {
                    codes.push(code.to_string());
                }
            }
        }
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_is_one_based_and_stable() {
        let arguments = vec![Some(json!("a")), Some(json!(2)), None];
        assert_eq!(substitute("%1-%2-%3", &arguments), "a-2-");
        assert_eq!(substitute("no placeholders", &arguments), "no placeholders");
    }

    #[test]
    fn access_handles_objects_and_arrays() {
        let value = json!({"items": [{"x": 1}]});
        let step1 = access(&value, &json!("items")).unwrap();
        let step2 = access(&step1, &json!(0)).unwrap();
        assert_eq!(access(&step2, &json!("x")), Some(json!(1)));
        assert_eq!(access(&step2, &json!("missing")), None);
    }

    #[test]
    fn sequences_coerce() {
        assert_eq!(as_sequence(None), Vec::<Value>::new());
        assert_eq!(as_sequence(Some(json!(null))), Vec::<Value>::new());
        assert_eq!(as_sequence(Some(json!([1, 2]))), vec![json!(1), json!(2)]);
        assert_eq!(as_sequence(Some(json!("x"))), vec![json!("x")]);
    }
}

//! Per-request evaluation context.
//!
//! `EvaluationRequest` is the engine's view of one HTTP request.
//! `EvalContext` is what handlers see: the request plus an immutable
//! scope-frame chain. Contexts are cheap to clone, and pushing a frame
//! never mutates the parent, so parallel invocations cannot pollute each
//! other's scope.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationRequest {
    /// Post body: string or string-list values.
    pub post: HashMap<String, Value>,
    /// Query string: string or string-list values.
    pub query: HashMap<String, Value>,
    /// Path parameters.
    pub params: HashMap<String, String>,
    pub metadata: RequestMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestMetadata {
    /// Externally supplied datasets, read through `Data` pseudo-nodes.
    pub data: Map<String, Value>,
    /// Session blob; persisted answers live under `session["answers"]`.
    pub session: Value,
    pub csrf_token: Option<String>,
    pub user: Option<Value>,
    /// `load`, `access`, `submission`, or `action`; inferred from the
    /// request when absent.
    pub transition_type: Option<String>,
}

impl EvaluationRequest {
    pub fn with_post(mut self, key: impl Into<String>, value: Value) -> Self {
        self.post.insert(key.into(), value);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: Value) -> Self {
        self.query.insert(key.into(), value);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.data.insert(key.into(), value);
        self
    }

    pub fn with_transition_type(mut self, kind: impl Into<String>) -> Self {
        self.metadata.transition_type = Some(kind.into());
        self
    }
}

// =============================================================================
// SCOPE STACK
// =============================================================================

#[derive(Debug)]
struct ScopeFrame {
    parent: Option<Arc<ScopeFrame>>,
    vars: BTreeMap<String, Value>,
    transition: Option<String>,
}

/// Immutable chain of scope frames. Pushing returns a new stack sharing
/// the tail.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    head: Option<Arc<ScopeFrame>>,
}

impl ScopeStack {
    pub fn push(&self, vars: BTreeMap<String, Value>) -> ScopeStack {
        ScopeStack {
            head: Some(Arc::new(ScopeFrame {
                parent: self.head.clone(),
                vars,
                transition: None,
            })),
        }
    }

    pub fn push_transition(&self, kind: impl Into<String>) -> ScopeStack {
        ScopeStack {
            head: Some(Arc::new(ScopeFrame {
                parent: self.head.clone(),
                vars: BTreeMap::new(),
                transition: Some(kind.into()),
            })),
        }
    }

    /// Innermost binding of `name`, e.g. `@item` or `@index`.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut cursor = self.head.as_ref();
        while let Some(frame) = cursor {
            if let Some(value) = frame.vars.get(name) {
                return Some(value.clone());
            }
            cursor = frame.parent.as_ref();
        }
        None
    }

    /// Nearest transition marker on the stack.
    pub fn transition(&self) -> Option<String> {
        let mut cursor = self.head.as_ref();
        while let Some(frame) = cursor {
            if let Some(kind) = &frame.transition {
                return Some(kind.clone());
            }
            cursor = frame.parent.as_ref();
        }
        None
    }
}

// =============================================================================
// EVAL CONTEXT
// =============================================================================

#[derive(Debug, Clone)]
pub struct EvalContext {
    pub request: Arc<EvaluationRequest>,
    pub scope: ScopeStack,
}

impl EvalContext {
    pub fn new(request: EvaluationRequest) -> Self {
        EvalContext {
            request: Arc::new(request),
            scope: ScopeStack::default(),
        }
    }

    /// Isolated child context used per invocation.
    pub fn isolated(&self) -> EvalContext {
        EvalContext {
            request: self.request.clone(),
            scope: self.scope.push(BTreeMap::new()),
        }
    }

    pub fn with_frame(&self, vars: BTreeMap<String, Value>) -> EvalContext {
        EvalContext {
            request: self.request.clone(),
            scope: self.scope.push(vars),
        }
    }

    pub fn with_transition(&self, kind: &str) -> EvalContext {
        EvalContext {
            request: self.request.clone(),
            scope: self.scope.push_transition(kind),
        }
    }

    /// Active transition type: scope marker first, then request metadata,
    /// then inferred (`submission` when a post body is present).
    pub fn transition_type(&self) -> Option<String> {
        self.scope
            .transition()
            .or_else(|| self.request.metadata.transition_type.clone())
            .or_else(|| {
                if self.request.post.is_empty() {
                    None
                } else {
                    Some("submission".to_string())
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_lookup_walks_frames() {
        let stack = ScopeStack::default();
        let mut outer = BTreeMap::new();
        outer.insert("@item".to_string(), json!("outer"));
        let outer_stack = stack.push(outer);

        let mut inner = BTreeMap::new();
        inner.insert("@index".to_string(), json!(3));
        let inner_stack = outer_stack.push(inner);

        assert_eq!(inner_stack.lookup("@item"), Some(json!("outer")));
        assert_eq!(inner_stack.lookup("@index"), Some(json!(3)));
        assert_eq!(outer_stack.lookup("@index"), None);
    }

    #[test]
    fn transition_type_falls_back_to_post_presence() {
        let cx = EvalContext::new(EvaluationRequest::default().with_post("a", json!("1")));
        assert_eq!(cx.transition_type().as_deref(), Some("submission"));

        let cx = EvalContext::new(EvaluationRequest::default());
        assert_eq!(cx.transition_type(), None);

        let under_load = cx.with_transition("load");
        assert_eq!(under_load.transition_type().as_deref(), Some("load"));
    }
}

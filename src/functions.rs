//! Pluggable function registry.
//!
//! Condition, transformer, effect, and generator implementations live
//! outside the engine; AST `Function` nodes address them by name. Each
//! entry receives a kind-specific context with request helpers and the
//! already-evaluated arguments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::ast::FunctionType;
use crate::eval::context::EvaluationRequest;

/// Context synthesised per function call. `kind` tells an implementation
/// which contract it is being called under; the helpers expose
/// request-scoped state.
#[derive(Clone)]
pub struct FunctionContext {
    pub kind: FunctionType,
    pub request: Arc<EvaluationRequest>,
    /// Transition type active at the call site (`load`, `access`,
    /// `submission`, `action`), pulled from the scope stack.
    pub transition: Option<String>,
    data: Arc<RwLock<Map<String, Value>>>,
}

impl FunctionContext {
    pub fn new(
        kind: FunctionType,
        request: Arc<EvaluationRequest>,
        transition: Option<String>,
        data: Arc<RwLock<Map<String, Value>>>,
    ) -> Self {
        FunctionContext {
            kind,
            request,
            transition,
            data,
        }
    }

    pub fn session(&self) -> &Value {
        &self.request.metadata.session
    }

    pub fn user(&self) -> Option<&Value> {
        self.request.metadata.user.as_ref()
    }

    /// Read a dataset property: values written by effects shadow the
    /// request's supplied data.
    pub fn data(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.data.read().expect("data store poisoned").get(key) {
            return Some(value.clone());
        }
        self.request.metadata.data.get(key).cloned()
    }

    /// Write a dataset property into request-scoped storage.
    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.data
            .write()
            .expect("data store poisoned")
            .insert(key.into(), value);
    }
}

/// One registered function. Implementations that never suspend should
/// leave `is_async` false so dependents stay on the synchronous path.
#[async_trait]
pub trait EngineFunction: Send + Sync {
    fn is_async(&self) -> bool {
        false
    }

    async fn call(&self, cx: &FunctionContext, args: Vec<Value>) -> Result<Value, String>;
}

struct SyncFunction<F>(F);

#[async_trait]
impl<F> EngineFunction for SyncFunction<F>
where
    F: Fn(&FunctionContext, Vec<Value>) -> Result<Value, String> + Send + Sync,
{
    async fn call(&self, cx: &FunctionContext, args: Vec<Value>) -> Result<Value, String> {
        (self.0)(cx, args)
    }
}

/// Registry of functions grouped by kind. Read-only during evaluation.
#[derive(Default)]
pub struct FunctionRegistry {
    entries: HashMap<(FunctionType, String), Arc<dyn EngineFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    pub fn register(
        &mut self,
        kind: FunctionType,
        name: impl Into<String>,
        function: Arc<dyn EngineFunction>,
    ) {
        self.entries.insert((kind, name.into()), function);
    }

    /// Convenience wrapper for synchronous closures.
    pub fn register_fn<F>(&mut self, kind: FunctionType, name: impl Into<String>, function: F)
    where
        F: Fn(&FunctionContext, Vec<Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(kind, name, Arc::new(SyncFunction(function)));
    }

    pub fn get(&self, kind: FunctionType, name: &str) -> Option<&Arc<dyn EngineFunction>> {
        self.entries.get(&(kind, name.to_string()))
    }

    pub fn is_async(&self, kind: FunctionType, name: &str) -> bool {
        self.get(kind, name).is_some_and(|f| f.is_async())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

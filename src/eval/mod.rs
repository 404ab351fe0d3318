//! Lazy, memoized evaluation.
//!
//! The evaluator owns one request's overlay, cache, and context. It walks
//! the compiled AST from the journey root, resolving handlers by node ID
//! and memoizing results under a version check: if a node's version moves
//! while its handler runs (runtime expansion invalidated it), the result
//! is discarded and the handler retried, up to a configurable cap.

pub mod cache;
pub mod context;
pub mod handlers;
pub mod overlay;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Map, Value};

use crate::ast::{FunctionType, Node, NodeKind, PseudoKind, PseudoNode};
use crate::error::{EngineError, ErrorKind};
use crate::functions::{FunctionContext, FunctionRegistry};
use crate::graph::GraphView;
use crate::id::{IdCategory, NodeId};
use crate::normalize::scope::{ScopeEntry, ScopeIndex};
use crate::program::Program;
use crate::registry::NodeView;

use cache::CacheManager;
use context::{EvalContext, EvaluationRequest};
use handlers::pseudo::is_safe_property_key;
use handlers::{HandlerMode, ThunkHandler, ThunkResult};
use overlay::{RuntimeHooks, RuntimeOverlay};

// =============================================================================
// OPTIONS & INSTRUMENTATION
// =============================================================================

#[derive(Debug, Clone)]
pub struct EvaluatorOptions {
    /// Invalidation-retry budget per node.
    pub max_retries: u32,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        EvaluatorOptions { max_retries: 10 }
    }
}

#[derive(Debug, Clone)]
pub enum EvalEvent {
    CacheHit { node: NodeId },
    Evaluated { node: NodeId },
    HandlerError { node: NodeId },
    Retry { node: NodeId, attempt: u32 },
    RuntimeExpansion { owner: NodeId, nodes: usize },
}

/// Instrumentation hook; tests observe cache hits and retry counts here.
pub trait EvalObserver: Send + Sync {
    fn on_event(&self, event: &EvalEvent);
}

/// Evaluator output for one request.
#[derive(Debug, Clone)]
pub struct EvaluationOutput {
    pub journey: ThunkResult,
}

// =============================================================================
// EVALUATOR
// =============================================================================

pub struct Evaluator {
    program: Arc<Program>,
    functions: Arc<FunctionRegistry>,
    options: EvaluatorOptions,
    observer: Option<Arc<dyn EvalObserver>>,
    pub(crate) overlay: RuntimeOverlay,
    cache: CacheManager,
    runtime_data: Arc<RwLock<Map<String, Value>>>,
    /// Memoized async classification; `None` marks in-progress entries so
    /// dependency cycles resolve to sync.
    async_memo: Mutex<HashMap<NodeId, Option<bool>>>,
}

impl Evaluator {
    pub fn new(program: Arc<Program>, functions: Arc<FunctionRegistry>) -> Self {
        let overlay = RuntimeOverlay::seeded(program.ids.clone());
        Evaluator {
            program,
            functions,
            options: EvaluatorOptions::default(),
            observer: None,
            overlay,
            cache: CacheManager::new(),
            runtime_data: Arc::new(RwLock::new(Map::new())),
            async_memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: EvaluatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn EvalObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn create_context(&self, request: EvaluationRequest) -> EvalContext {
        EvalContext::new(request)
    }

    /// Evaluate the journey root.
    pub async fn evaluate(&self, cx: &EvalContext) -> EvaluationOutput {
        let journey = self.invoke(&self.program.journey, cx).await;
        EvaluationOutput { journey }
    }

    // -------------------------------------------------------------------------
    // Invocation
    // -------------------------------------------------------------------------

    /// Invoke one node under an isolated scope frame, picking the sync or
    /// async entry point from the dependency-derived classification.
    pub async fn invoke(&self, id: &NodeId, cx: &EvalContext) -> ThunkResult {
        let cx = cx.isolated();
        if self.is_async(id) {
            self.invoke_with_retry(id, &cx).await
        } else {
            self.invoke_sync_with_retry(id, &cx)
        }
    }

    /// Synchronous invocation; only valid for nodes classified as sync.
    pub fn invoke_sync(&self, id: &NodeId, cx: &EvalContext) -> ThunkResult {
        if self.is_async(id) {
            return ThunkResult::failure(
                EngineError::evaluation("async node invoked on the synchronous path", id.clone()),
                "Evaluator",
            );
        }
        let cx = cx.isolated();
        self.invoke_sync_with_retry(id, &cx)
    }

    async fn invoke_with_retry(&self, id: &NodeId, cx: &EvalContext) -> ThunkResult {
        if let Some(hit) = self.cache.get(id) {
            self.emit(EvalEvent::CacheHit { node: id.clone() });
            return hit;
        }
        let Some(handler) = self.handler(id) else {
            return self.cache_miss_no_handler(id);
        };
        let mut attempt = 0u32;
        loop {
            let version_start = self.cache.version(id);
            let hooks = RuntimeHooks::new(self, id.clone());
            let result = handler.evaluate(cx, self, &hooks).await;
            if self.cache.version(id) == version_start {
                return self.settle(id, result);
            }
            self.cache.delete(id);
            attempt += 1;
            log::debug!("invalidation mid-evaluation of {}, retry {}", id, attempt);
            self.emit(EvalEvent::Retry {
                node: id.clone(),
                attempt,
            });
            if attempt >= self.options.max_retries {
                return self.settle(
                    id,
                    ThunkResult::failure(
                        EngineError::new(
                            ErrorKind::MaxRetriesExceeded,
                            format!("evaluation retried {} times", attempt),
                        )
                        .with_node(id.clone()),
                        "Evaluator",
                    ),
                );
            }
        }
    }

    fn invoke_sync_with_retry(&self, id: &NodeId, cx: &EvalContext) -> ThunkResult {
        if let Some(hit) = self.cache.get(id) {
            self.emit(EvalEvent::CacheHit { node: id.clone() });
            return hit;
        }
        let Some(handler) = self.handler(id) else {
            return self.cache_miss_no_handler(id);
        };
        let mut attempt = 0u32;
        loop {
            let version_start = self.cache.version(id);
            let result = handler.evaluate_sync(cx, self);
            if self.cache.version(id) == version_start {
                return self.settle(id, result);
            }
            self.cache.delete(id);
            attempt += 1;
            self.emit(EvalEvent::Retry {
                node: id.clone(),
                attempt,
            });
            if attempt >= self.options.max_retries {
                return self.settle(
                    id,
                    ThunkResult::failure(
                        EngineError::new(
                            ErrorKind::MaxRetriesExceeded,
                            format!("evaluation retried {} times", attempt),
                        )
                        .with_node(id.clone()),
                        "Evaluator",
                    ),
                );
            }
        }
    }

    fn cache_miss_no_handler(&self, id: &NodeId) -> ThunkResult {
        let result = ThunkResult::failure(
            EngineError::new(
                ErrorKind::HandlerNotFound,
                format!("no handler registered for '{}'", id),
            )
            .with_node(id.clone()),
            "Evaluator",
        );
        self.cache.set(id, result.clone());
        result
    }

    fn settle(&self, id: &NodeId, result: ThunkResult) -> ThunkResult {
        if result.is_error() {
            self.emit(EvalEvent::HandlerError { node: id.clone() });
        }
        self.cache.set(id, result.clone());
        self.emit(EvalEvent::Evaluated { node: id.clone() });
        result
    }

    // -------------------------------------------------------------------------
    // Async classification
    // -------------------------------------------------------------------------

    /// Whether invoking `id` may suspend: the handler's own nature, or for
    /// hybrid handlers, any data-flow producer that may suspend.
    pub fn is_async(&self, id: &NodeId) -> bool {
        {
            let memo = self.async_memo.lock().expect("async memo poisoned");
            match memo.get(id) {
                Some(Some(answer)) => return *answer,
                // In-progress: a dependency cycle resolves to sync.
                Some(None) => return false,
                None => {}
            }
        }
        self.async_memo
            .lock()
            .expect("async memo poisoned")
            .insert(id.clone(), None);

        let answer = match self.handler(id).map(|handler| handler.mode()) {
            None => false,
            Some(HandlerMode::Sync) => false,
            Some(HandlerMode::Async) => true,
            Some(HandlerMode::Hybrid) => self
                .value_dependencies(id)
                .iter()
                .any(|producer| self.is_async(producer)),
        };
        self.async_memo
            .lock()
            .expect("async memo poisoned")
            .insert(id.clone(), Some(answer));
        answer
    }

    /// Data-flow producers of `id`, excluding transition-ordering edges.
    fn value_dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        let delta = self.overlay.graph.read().expect("overlay graph poisoned");
        let view = GraphView::layered(&self.program.graph, &delta);
        view.in_edges(id)
            .into_iter()
            .filter(|(_, data)| {
                data.kind == crate::graph::EdgeKind::DataFlow
                    && data.property.as_deref() != Some("onAccess")
                    && data.property.as_deref() != Some("onSubmission")
            })
            .map(|(from, _)| from.clone())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Layered lookups
    // -------------------------------------------------------------------------

    fn handler(&self, id: &NodeId) -> Option<Arc<dyn ThunkHandler>> {
        self.overlay
            .handlers
            .read()
            .expect("overlay handlers poisoned")
            .get(id)
            .or_else(|| self.program.handlers.get(id))
    }

    pub fn node(&self, id: &NodeId) -> Option<Node> {
        let delta = self.overlay.nodes.read().expect("overlay nodes poisoned");
        NodeView::layered(&self.program.nodes, &delta)
            .get(id)
            .cloned()
    }

    pub fn pseudo_for(&self, kind: PseudoKind, base: &str) -> Option<PseudoNode> {
        let delta = self.overlay.nodes.read().expect("overlay nodes poisoned");
        NodeView::layered(&self.program.nodes, &delta)
            .find_pseudo(kind, base)
            .cloned()
    }

    /// The pseudo-node wired as producer of a reference, if any.
    pub fn producer_pseudo_of(&self, reference: &NodeId) -> Option<NodeId> {
        let delta = self.overlay.graph.read().expect("overlay graph poisoned");
        let view = GraphView::layered(&self.program.graph, &delta);
        view.in_edges(reference)
            .into_iter()
            .find(|(_, data)| data.reference_type.is_some())
            .map(|(from, _)| from.clone())
    }

    pub fn metadata_flag(&self, id: &NodeId, key: &str) -> bool {
        let delta = self
            .overlay
            .metadata
            .read()
            .expect("overlay metadata poisoned");
        crate::registry::MetadataView::layered(&self.program.metadata, &delta).flag(id, key)
    }

    /// Per-request metadata writes (`isCurrentStep`, …) land in the overlay.
    pub fn set_runtime_metadata(&self, id: &NodeId, key: &str, value: Value) {
        self.overlay
            .metadata
            .write()
            .expect("overlay metadata poisoned")
            .set(id, key, value);
    }

    pub fn scope_entry(&self, id: &NodeId) -> Option<ScopeEntry> {
        let delta = self.overlay.scopes.read().expect("overlay scopes poisoned");
        crate::normalize::scope::ScopeView::layered(&self.program.scopes, &delta)
            .entry(id)
            .cloned()
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        let delta = self.overlay.nodes.read().expect("overlay nodes poisoned");
        NodeView::layered(&self.program.nodes, &delta).ids_of_kind(kind)
    }

    // -------------------------------------------------------------------------
    // Request data
    // -------------------------------------------------------------------------

    pub fn function_context(&self, kind: FunctionType, cx: &EvalContext) -> FunctionContext {
        FunctionContext::new(
            kind,
            cx.request.clone(),
            cx.transition_type(),
            self.runtime_data.clone(),
        )
    }

    /// Dataset lookup: effect-written values shadow the request's data.
    pub fn request_data(&self, cx: &EvalContext, key: &str) -> Option<Value> {
        if let Some(value) = self
            .runtime_data
            .read()
            .expect("runtime data poisoned")
            .get(key)
        {
            return Some(value.clone());
        }
        cx.request.metadata.data.get(key).cloned()
    }

    /// Fallback read for references whose base never materialized a
    /// pseudo-node (dynamic second segment).
    pub fn direct_source_read(
        &self,
        cx: &EvalContext,
        kind: PseudoKind,
        base: &str,
    ) -> Option<Value> {
        if !is_safe_property_key(base) {
            return None;
        }
        match kind {
            PseudoKind::Data => self.request_data(cx, base),
            PseudoKind::Query => cx.request.query.get(base).cloned(),
            PseudoKind::Params => cx
                .request
                .params
                .get(base)
                .map(|value| Value::String(value.clone())),
            PseudoKind::Post => cx.request.post.get(base).cloned(),
            PseudoKind::Answer | PseudoKind::AnswerRemote => cx
                .request
                .metadata
                .session
                .get("answers")
                .and_then(|answers| answers.get(base))
                .cloned()
                .or_else(|| cx.request.post.get(base).cloned()),
        }
    }

    // -------------------------------------------------------------------------
    // Overlay expansion & invalidation
    // -------------------------------------------------------------------------

    pub fn next_runtime_id(&self, category: IdCategory) -> NodeId {
        self.overlay
            .ids
            .lock()
            .expect("overlay ids poisoned")
            .next(category)
    }

    /// Register a runtime node directly (tests and custom handlers; the
    /// iteration path goes through `RuntimeHooks`).
    pub fn register_runtime_node(
        &self,
        node: Node,
        parent: Option<NodeId>,
    ) -> Result<(), EngineError> {
        let id = node.id().clone();
        {
            let mut delta = self.overlay.nodes.write().expect("overlay nodes poisoned");
            delta
                .register(node, parent, "runtime")
                .map_err(|err| EngineError::new(ErrorKind::DuplicateId, err.to_string()))?;
        }
        let delta = self.overlay.nodes.read().expect("overlay nodes poisoned");
        let view = NodeView::layered(&self.program.nodes, &delta);
        let entry = ScopeIndex::entry_for(view, &id);
        self.overlay
            .scopes
            .write()
            .expect("overlay scopes poisoned")
            .insert(id, entry);
        Ok(())
    }

    pub fn register_runtime_handler(
        &self,
        handler: Arc<dyn ThunkHandler>,
    ) -> Result<(), EngineError> {
        self.overlay
            .handlers
            .write()
            .expect("overlay handlers poisoned")
            .register(handler)
            .map_err(|err| EngineError::new(ErrorKind::DuplicateId, err.to_string()))
    }

    /// Bump `id` and everything reachable from it along `DATA_FLOW` edges,
    /// dropping their memoized results.
    pub fn invalidate_cascading(&self, id: &NodeId) {
        let reachable = {
            let delta = self.overlay.graph.read().expect("overlay graph poisoned");
            GraphView::layered(&self.program.graph, &delta).data_flow_reachable(id)
        };
        self.cache.invalidate(id);
        for node in &reachable {
            self.cache.invalidate(node);
        }
        log::debug!("invalidated {} and {} dependent(s)", id, reachable.len());
    }

    pub fn version(&self, id: &NodeId) -> u64 {
        self.cache.version(id)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.cached_count()
    }

    pub(crate) fn emit_runtime_expansion(&self, owner: &NodeId, nodes: usize) {
        self.emit(EvalEvent::RuntimeExpansion {
            owner: owner.clone(),
            nodes,
        });
    }

    fn emit(&self, event: EvalEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}

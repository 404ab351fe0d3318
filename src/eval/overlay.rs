//! Runtime overlay: per-request registry, graph, and handler deltas.
//!
//! The compiled program stays read-only for its whole life; everything a
//! handler registers during evaluation lands here and is discarded with
//! the evaluator. `RuntimeHooks` is the per-invocation facade handlers
//! use to expand the overlay (collection iteration being the main
//! client).

use std::sync::{Mutex, RwLock};

use crate::ast::clone::plan_clone;
use crate::ast::{Node, PropValue, PseudoKind, PseudoNode};
use crate::error::{EngineError, ErrorKind};
use crate::eval::Evaluator;
use crate::eval::handlers::{ThunkHandlerRegistry, handler_for};
use crate::graph::{DependencyGraph, EdgeData};
use crate::id::{IdCategory, IdGenerator, NodeId};
use crate::normalize::scope::{ScopeIndex, ScopeView};
use crate::registry::{MetadataRegistry, MetadataView, NodeRegistry, NodeView};
use crate::wire;

/// Delta layers over the compiled program, owned by one evaluator.
pub struct RuntimeOverlay {
    pub(crate) nodes: RwLock<NodeRegistry>,
    pub(crate) metadata: RwLock<MetadataRegistry>,
    pub(crate) handlers: RwLock<ThunkHandlerRegistry>,
    pub(crate) graph: RwLock<DependencyGraph>,
    pub(crate) scopes: RwLock<ScopeIndex>,
    pub(crate) ids: Mutex<IdGenerator>,
}

impl RuntimeOverlay {
    /// `seed` continues the compile-time generator so runtime IDs never
    /// collide with IDs already present in the base registry.
    pub fn seeded(seed: IdGenerator) -> Self {
        RuntimeOverlay {
            nodes: RwLock::new(NodeRegistry::new()),
            metadata: RwLock::new(MetadataRegistry::new()),
            handlers: RwLock::new(ThunkHandlerRegistry::new()),
            graph: RwLock::new(DependencyGraph::new()),
            scopes: RwLock::new(ScopeIndex::default()),
            ids: Mutex::new(seed),
        }
    }
}

#[derive(Default)]
struct PendingBatch {
    nodes: Vec<NodeId>,
    edges: Vec<(NodeId, NodeId, EdgeData)>,
}

/// Per-invocation runtime hooks, bound to the invoking node. Registered
/// nodes and edges accumulate until `register_runtime_nodes_batch` wires
/// them and bumps affected cache versions.
pub struct RuntimeHooks<'a> {
    ev: &'a Evaluator,
    owner: NodeId,
    pending: Mutex<PendingBatch>,
}

impl<'a> RuntimeHooks<'a> {
    pub(crate) fn new(ev: &'a Evaluator, owner: NodeId) -> Self {
        RuntimeHooks {
            ev,
            owner,
            pending: Mutex::new(PendingBatch::default()),
        }
    }

    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    /// Clone a compiled property template into the overlay under fresh
    /// runtime IDs, registering nodes, handlers, and scope entries. The
    /// returned value mirrors the template with node links remapped.
    pub fn transform_value(&self, template: &PropValue) -> Result<PropValue, EngineError> {
        match template {
            PropValue::Value(value) => Ok(PropValue::Value(value.clone())),
            PropValue::Node(id) => Ok(PropValue::Node(self.clone_node(id)?)),
            PropValue::List(items) => Ok(PropValue::List(
                items
                    .iter()
                    .map(|item| self.transform_value(item))
                    .collect::<Result<_, _>>()?,
            )),
            PropValue::Map(entries) => Ok(PropValue::Map(
                entries
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), self.transform_value(value)?)))
                    .collect::<Result<_, EngineError>>()?,
            )),
        }
    }

    fn clone_node(&self, source: &NodeId) -> Result<NodeId, EngineError> {
        let overlay = &self.ev.overlay;
        let program = self.ev.program();

        let plan = {
            let delta = overlay.nodes.read().expect("overlay nodes poisoned");
            plan_clone(NodeView::layered(&program.nodes, &delta), source).ok_or_else(|| {
                EngineError::evaluation("clone source is not a registered AST node", source.clone())
            })?
        };

        let (root, created) = {
            let mut delta = overlay.nodes.write().expect("overlay nodes poisoned");
            let mut ids = overlay.ids.lock().expect("overlay ids poisoned");
            plan.register(
                &mut delta,
                &mut ids,
                IdCategory::RuntimeAst,
                Some(self.owner.clone()),
                "runtime",
            )
            .map_err(|err| {
                EngineError::new(ErrorKind::DuplicateId, err.to_string())
                    .with_node(self.owner.clone())
            })?
        };

        self.index_new_nodes(&created)?;
        self.pending
            .lock()
            .expect("pending batch poisoned")
            .nodes
            .extend(created);
        Ok(root)
    }

    /// Find or create the runtime `AnswerRemote` pseudo-node for `base`.
    pub fn ensure_answer_remote(&self, base: &str) -> Result<NodeId, EngineError> {
        let overlay = &self.ev.overlay;
        {
            let delta = overlay.nodes.read().expect("overlay nodes poisoned");
            if let Some(existing) = delta.find_pseudo(PseudoKind::AnswerRemote, base) {
                return Ok(existing.id.clone());
            }
        }
        let id = {
            let mut ids = overlay.ids.lock().expect("overlay ids poisoned");
            ids.next(IdCategory::RuntimePseudo)
        };
        let pseudo = PseudoNode {
            id: id.clone(),
            kind: PseudoKind::AnswerRemote,
            base: base.to_string(),
            field_node: None,
        };
        {
            let mut delta = overlay.nodes.write().expect("overlay nodes poisoned");
            delta
                .register(
                    Node::Pseudo(pseudo),
                    None,
                    format!("AnswerRemote:{}", base),
                )
                .map_err(|err| EngineError::new(ErrorKind::DuplicateId, err.to_string()))?;
        }
        self.index_new_nodes(std::slice::from_ref(&id))?;
        self.pending
            .lock()
            .expect("pending batch poisoned")
            .nodes
            .push(id.clone());
        Ok(id)
    }

    /// Queue an explicit data-flow edge for the next batch.
    pub fn add_edge(&self, from: &NodeId, to: &NodeId, data: EdgeData) {
        self.pending
            .lock()
            .expect("pending batch poisoned")
            .edges
            .push((from.clone(), to.clone(), data));
    }

    /// Wire every pending node and edge into the overlay graph, then bump
    /// cache versions downstream of each newly inserted edge source so
    /// stale memoizations are retried.
    pub fn register_runtime_nodes_batch(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock().expect("pending batch poisoned"));
        if batch.nodes.is_empty() && batch.edges.is_empty() {
            return 0;
        }

        let overlay = &self.ev.overlay;
        let program = self.ev.program();
        let mut inserted_from = Vec::new();
        {
            let delta_nodes = overlay.nodes.read().expect("overlay nodes poisoned");
            let delta_meta = overlay.metadata.read().expect("overlay metadata poisoned");
            let delta_scopes = overlay.scopes.read().expect("overlay scopes poisoned");
            let mut delta_graph = overlay.graph.write().expect("overlay graph poisoned");
            let mut cx = wire::WiringContext {
                nodes: NodeView::layered(&program.nodes, &delta_nodes),
                metadata: MetadataView::layered(&program.metadata, &delta_meta),
                scopes: ScopeView::layered(&program.scopes, &delta_scopes),
                graph: &mut delta_graph,
            };
            wire::wire_nodes(&mut cx, &batch.nodes);
            for (from, to, data) in batch.edges {
                if delta_graph.add_edge(&from, &to, data) {
                    inserted_from.push(from);
                }
            }
        }

        for from in inserted_from {
            self.ev.invalidate_cascading(&from);
        }
        let count = batch.nodes.len();
        log::debug!(
            "runtime expansion by {}: {} node(s) registered",
            self.owner,
            count
        );
        self.ev.emit_runtime_expansion(&self.owner, count);
        count
    }

    /// Register handlers and scope entries for freshly added overlay nodes.
    fn index_new_nodes(&self, ids: &[NodeId]) -> Result<(), EngineError> {
        let overlay = &self.ev.overlay;
        let program = self.ev.program();
        let delta = overlay.nodes.read().expect("overlay nodes poisoned");
        let view = NodeView::layered(&program.nodes, &delta);
        let mut handlers = overlay.handlers.write().expect("overlay handlers poisoned");
        let mut scopes = overlay.scopes.write().expect("overlay scopes poisoned");
        for id in ids {
            let Some(node) = view.get(id) else {
                continue;
            };
            handlers.register(handler_for(node, view)).map_err(|err| {
                EngineError::new(ErrorKind::DuplicateId, err.to_string()).with_node(id.clone())
            })?;
            scopes.insert(id.clone(), ScopeIndex::entry_for(view, id));
        }
        Ok(())
    }
}

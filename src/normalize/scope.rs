//! Scope-chain index.
//!
//! For every AST node, the ordered structural ancestry
//! (journey → step → block* → self) and the root-first list of `onLoad`
//! transition IDs found along it. Pseudo-nodes and unknown IDs have no
//! entry.

use std::collections::HashMap;

use crate::ast::NodeKind;
use crate::id::NodeId;
use crate::registry::{NodeRegistry, NodeView};

#[derive(Debug, Clone, Default)]
pub struct ScopeEntry {
    /// Root-first structural ancestors, ending with the node itself.
    pub chain: Vec<NodeId>,
    pub journey: Option<NodeId>,
    pub step: Option<NodeId>,
    /// `onLoad` transition IDs along the chain, root-first.
    pub load_transitions: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub struct ScopeIndex {
    entries: HashMap<NodeId, ScopeEntry>,
}

impl ScopeIndex {
    pub fn build(registry: &NodeRegistry) -> ScopeIndex {
        let view = NodeView::base_only(registry);
        let mut entries = HashMap::new();
        for node in registry.iter() {
            if node.as_ast().is_some() {
                entries.insert(node.id().clone(), Self::entry_for(view, node.id()));
            }
        }
        ScopeIndex { entries }
    }

    /// Compute one entry by walking parent links through `view`. Shared
    /// with the runtime overlay, which indexes nodes it registers itself.
    pub fn entry_for(view: NodeView<'_>, id: &NodeId) -> ScopeEntry {
        let mut lineage = vec![id.clone()];
        let mut cursor = view.parent(id).cloned();
        while let Some(ancestor) = cursor {
            cursor = view.parent(&ancestor).cloned();
            lineage.push(ancestor);
        }
        lineage.reverse();

        let mut entry = ScopeEntry::default();
        for (position, node_id) in lineage.iter().enumerate() {
            let Some(node) = view.ast(node_id) else {
                continue;
            };
            let is_self = position == lineage.len() - 1;
            if !node.kind.is_structural() && !is_self {
                continue;
            }
            match node.kind {
                NodeKind::Journey => entry.journey = Some(node_id.clone()),
                NodeKind::Step => entry.step = Some(node_id.clone()),
                _ => {}
            }
            entry
                .load_transitions
                .extend(node.node_list_prop("onLoad"));
            entry.chain.push(node_id.clone());
        }
        entry
    }

    pub fn entry(&self, id: &NodeId) -> Option<&ScopeEntry> {
        self.entries.get(id)
    }

    pub fn chain(&self, id: &NodeId) -> &[NodeId] {
        self.entry(id).map(|e| e.chain.as_slice()).unwrap_or(&[])
    }

    pub fn load_transitions(&self, id: &NodeId) -> &[NodeId] {
        self.entry(id)
            .map(|e| e.load_transitions.as_slice())
            .unwrap_or(&[])
    }

    pub fn step_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.entry(id).and_then(|e| e.step.as_ref())
    }

    pub fn journey_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.entry(id).and_then(|e| e.journey.as_ref())
    }

    pub(crate) fn insert(&mut self, id: NodeId, entry: ScopeEntry) {
        self.entries.insert(id, entry);
    }
}

/// Read view over the compiled scope index plus a runtime delta.
#[derive(Clone, Copy)]
pub struct ScopeView<'a> {
    base: &'a ScopeIndex,
    delta: Option<&'a ScopeIndex>,
}

impl<'a> ScopeView<'a> {
    pub fn base_only(base: &'a ScopeIndex) -> Self {
        ScopeView { base, delta: None }
    }

    pub fn layered(base: &'a ScopeIndex, delta: &'a ScopeIndex) -> Self {
        ScopeView {
            base,
            delta: Some(delta),
        }
    }

    pub fn entry(&self, id: &NodeId) -> Option<&'a ScopeEntry> {
        self.delta
            .and_then(|d| d.entry(id))
            .or_else(|| self.base.entry(id))
    }

    pub fn chain(&self, id: &NodeId) -> &'a [NodeId] {
        self.entry(id).map(|e| e.chain.as_slice()).unwrap_or(&[])
    }

    pub fn step_of(&self, id: &NodeId) -> Option<&'a NodeId> {
        self.entry(id).and_then(|e| e.step.as_ref())
    }

    pub fn load_transitions(&self, id: &NodeId) -> &'a [NodeId] {
        self.entry(id)
            .map(|e| e.load_transitions.as_slice())
            .unwrap_or(&[])
    }
}

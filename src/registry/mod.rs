//! Node and metadata registries.
//!
//! The compiled program owns one base layer of each registry. Evaluation
//! never mutates a base layer: per-request additions land in a delta
//! registry of the same shape, and reads go through the layered views
//! (`NodeView`, `MetadataView`) which check the delta first.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use thiserror::Error;

use crate::ast::{AstNode, Node, NodeKind, PseudoKind, PseudoNode};
use crate::id::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("node '{0}' is already registered")]
    DuplicateId(NodeId),
}

// =============================================================================
// NODE REGISTRY
// =============================================================================

/// Owns nodes and their structural context: declarative path breadcrumbs,
/// parent links, and reverse indices by kind.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, Node>,
    paths: HashMap<NodeId, String>,
    parents: HashMap<NodeId, NodeId>,
    by_ast_kind: HashMap<NodeKind, Vec<NodeId>>,
    by_pseudo_kind: HashMap<PseudoKind, Vec<NodeId>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    pub fn register(
        &mut self,
        node: Node,
        parent: Option<NodeId>,
        path: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let id = node.id().clone();
        if self.nodes.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        match &node {
            Node::Ast(ast) => self.by_ast_kind.entry(ast.kind).or_default().push(id.clone()),
            Node::Pseudo(pseudo) => self
                .by_pseudo_kind
                .entry(pseudo.kind)
                .or_default()
                .push(id.clone()),
        }
        if let Some(parent) = parent {
            self.parents.insert(id.clone(), parent);
        }
        self.paths.insert(id.clone(), path.into());
        self.nodes.insert(id, node);
        Ok(())
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn ast(&self, id: &NodeId) -> Option<&AstNode> {
        self.get(id).and_then(Node::as_ast)
    }

    pub fn pseudo(&self, id: &NodeId) -> Option<&PseudoNode> {
        self.get(id).and_then(Node::as_pseudo)
    }

    /// Mutable access for normalization passes. Evaluation never calls this
    /// on a base layer.
    pub fn ast_mut(&mut self, id: &NodeId) -> Option<&mut AstNode> {
        match self.nodes.get_mut(id) {
            Some(Node::Ast(node)) => Some(node),
            _ => None,
        }
    }

    pub fn parent(&self, id: &NodeId) -> Option<&NodeId> {
        self.parents.get(id)
    }

    pub fn path(&self, id: &NodeId) -> Option<&str> {
        self.paths.get(id).map(String::as_str)
    }

    pub fn ids_of_kind(&self, kind: NodeKind) -> &[NodeId] {
        self.by_ast_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pseudo_ids(&self, kind: PseudoKind) -> &[NodeId] {
        self.by_pseudo_kind
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find_pseudo(&self, kind: PseudoKind, base: &str) -> Option<&PseudoNode> {
        self.pseudo_ids(kind)
            .iter()
            .filter_map(|id| self.pseudo(id))
            .find(|pseudo| pseudo.base == base)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Read view over a base registry plus an optional runtime delta.
/// Lookups check the delta first; iteration is the union.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    base: &'a NodeRegistry,
    delta: Option<&'a NodeRegistry>,
}

impl<'a> NodeView<'a> {
    pub fn base_only(base: &'a NodeRegistry) -> Self {
        NodeView { base, delta: None }
    }

    pub fn layered(base: &'a NodeRegistry, delta: &'a NodeRegistry) -> Self {
        NodeView {
            base,
            delta: Some(delta),
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&'a Node> {
        self.delta
            .and_then(|d| d.get(id))
            .or_else(|| self.base.get(id))
    }

    pub fn ast(&self, id: &NodeId) -> Option<&'a AstNode> {
        self.get(id).and_then(Node::as_ast)
    }

    pub fn pseudo(&self, id: &NodeId) -> Option<&'a PseudoNode> {
        self.get(id).and_then(Node::as_pseudo)
    }

    pub fn parent(&self, id: &NodeId) -> Option<&'a NodeId> {
        self.delta
            .and_then(|d| d.parent(id))
            .or_else(|| self.base.parent(id))
    }

    pub fn path(&self, id: &NodeId) -> Option<&'a str> {
        self.delta
            .and_then(|d| d.path(id))
            .or_else(|| self.base.path(id))
    }

    pub fn ids_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.base.ids_of_kind(kind).to_vec();
        if let Some(delta) = self.delta {
            ids.extend(delta.ids_of_kind(kind).iter().cloned());
        }
        ids
    }

    pub fn pseudo_ids(&self, kind: PseudoKind) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.base.pseudo_ids(kind).to_vec();
        if let Some(delta) = self.delta {
            ids.extend(delta.pseudo_ids(kind).iter().cloned());
        }
        ids
    }

    /// Find a pseudo-node by kind and base, preferring the runtime layer.
    pub fn find_pseudo(&self, kind: PseudoKind, base: &str) -> Option<&'a PseudoNode> {
        self.delta
            .and_then(|d| d.find_pseudo(kind, base))
            .or_else(|| self.base.find_pseudo(kind, base))
    }
}

// =============================================================================
// METADATA REGISTRY
// =============================================================================

/// Arbitrary (node ID, key) → value annotations. Compile passes stamp
/// durable facts here; the lifecycle coordinator stamps per-request flags
/// (`isCurrentStep`, `isAncestorOfStep`) into the overlay layer.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entries: HashMap<NodeId, BTreeMap<String, Value>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        MetadataRegistry::default()
    }

    pub fn set(&mut self, id: &NodeId, key: impl Into<String>, value: Value) {
        self.entries
            .entry(id.clone())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn get(&self, id: &NodeId, key: &str) -> Option<&Value> {
        self.entries.get(id).and_then(|entry| entry.get(key))
    }

    pub fn flag(&self, id: &NodeId, key: &str) -> bool {
        matches!(self.get(id, key), Some(Value::Bool(true)))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy)]
pub struct MetadataView<'a> {
    base: &'a MetadataRegistry,
    delta: Option<&'a MetadataRegistry>,
}

impl<'a> MetadataView<'a> {
    pub fn base_only(base: &'a MetadataRegistry) -> Self {
        MetadataView { base, delta: None }
    }

    pub fn layered(base: &'a MetadataRegistry, delta: &'a MetadataRegistry) -> Self {
        MetadataView {
            base,
            delta: Some(delta),
        }
    }

    pub fn get(&self, id: &NodeId, key: &str) -> Option<&'a Value> {
        self.delta
            .and_then(|d| d.get(id, key))
            .or_else(|| self.base.get(id, key))
    }

    pub fn flag(&self, id: &NodeId, key: &str) -> bool {
        matches!(self.get(id, key), Some(Value::Bool(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::raw::RawArena;
    use crate::id::{IdCategory, IdGenerator};

    fn ast_node(generator: &mut IdGenerator, kind: NodeKind) -> Node {
        let mut arena = RawArena::new();
        Node::Ast(AstNode {
            id: generator.next(IdCategory::CompileAst),
            kind,
            properties: BTreeMap::new(),
            raw: arena.intern(Value::Null),
        })
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut generator = IdGenerator::new();
        let mut registry = NodeRegistry::new();
        let node = ast_node(&mut generator, NodeKind::Step);
        let dup = node.clone();
        registry.register(node, None, "steps[0]").unwrap();
        let err = registry.register(dup, None, "steps[0]").unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(_)));
    }

    #[test]
    fn layered_view_prefers_delta() {
        let mut generator = IdGenerator::new();
        let mut base = NodeRegistry::new();
        let mut delta = NodeRegistry::new();

        let base_node = ast_node(&mut generator, NodeKind::Step);
        let base_id = base_node.id().clone();
        base.register(base_node, None, "steps[0]").unwrap();

        let delta_node = ast_node(&mut generator, NodeKind::Block);
        let delta_id = delta_node.id().clone();
        delta.register(delta_node, None, "runtime").unwrap();

        let view = NodeView::layered(&base, &delta);
        assert!(view.get(&base_id).is_some());
        assert!(view.get(&delta_id).is_some());
        assert_eq!(view.ids_of_kind(NodeKind::Step).len(), 1);
        assert_eq!(view.ids_of_kind(NodeKind::Block).len(), 1);
    }

    #[test]
    fn metadata_view_overrides() {
        let mut generator = IdGenerator::new();
        let id = generator.next(IdCategory::CompileAst);
        let mut base = MetadataRegistry::new();
        let mut delta = MetadataRegistry::new();
        base.set(&id, "isCurrentStep", Value::Bool(false));
        delta.set(&id, "isCurrentStep", Value::Bool(true));

        let view = MetadataView::layered(&base, &delta);
        assert!(view.flag(&id, "isCurrentStep"));
    }
}

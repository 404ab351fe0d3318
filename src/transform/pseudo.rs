//! Pseudo-node factories.
//!
//! Pseudo-nodes are never declared: they materialize from reference paths.
//! A reference whose path starts with a known external root (`answers`,
//! `data`, `post`, `query`, `params`) gets a pseudo-node keyed by the
//! path's second segment. References with a dynamic second segment are
//! resolved entirely at evaluation time and get no producer here.

use serde_json::Value;

use crate::ast::{Node, NodeKind, PropValue, PseudoKind, PseudoNode};
use crate::error::{EngineError, ErrorKind};
use crate::id::{IdCategory, IdGenerator, NodeId};
use crate::registry::{MetadataRegistry, NodeRegistry};

/// `(kind, base)` demands extracted from one reference path.
pub fn demand_of(path: &[PropValue]) -> Option<(PseudoKind, String)> {
    let root = path.first()?.as_str()?;
    let kind = PseudoKind::from_path_root(root)?;
    let base = path.get(1)?.as_str()?;
    Some((kind, base.to_string()))
}

/// Create every pseudo-node demanded by the reference nodes in `scope_ids`
/// (or the whole registry when `scope_ids` is `None`). Idempotent per
/// `(kind, base)`. Returns the IDs created by this call.
pub fn materialize(
    registry: &mut NodeRegistry,
    metadata: &mut MetadataRegistry,
    ids: &mut IdGenerator,
    category: IdCategory,
    scope_ids: Option<&[NodeId]>,
    errors: &mut Vec<EngineError>,
) -> Vec<NodeId> {
    let reference_ids: Vec<NodeId> = match scope_ids {
        Some(scoped) => scoped
            .iter()
            .filter(|id| {
                registry
                    .ast(id)
                    .is_some_and(|node| node.kind == NodeKind::Reference)
            })
            .cloned()
            .collect(),
        None => registry.ids_of_kind(NodeKind::Reference).to_vec(),
    };

    let mut demands = Vec::new();
    for reference_id in &reference_ids {
        let Some(reference) = registry.ast(reference_id) else {
            continue;
        };
        let Some(PropValue::List(path)) = reference.prop("path") else {
            continue;
        };
        if let Some(demand) = demand_of(path) {
            if !demands.contains(&demand) {
                demands.push(demand);
            }
        }
    }

    let mut created = Vec::new();
    for (kind, base) in demands {
        if registry.find_pseudo(kind, &base).is_some() {
            continue;
        }
        let field_node = match kind {
            PseudoKind::Post | PseudoKind::Answer => field_with_code(registry, &base),
            _ => None,
        };
        let id = ids.next(category);
        let pseudo = PseudoNode {
            id: id.clone(),
            kind,
            base: base.clone(),
            field_node: field_node.clone(),
        };
        let path = format!("{}:{}", kind.as_str(), base);
        if let Err(err) = registry.register(Node::Pseudo(pseudo), None, path) {
            errors.push(EngineError::new(ErrorKind::DuplicateId, err.to_string()).with_node(id));
            continue;
        }
        if let Some(field_id) = field_node {
            metadata.set(&id, "fieldNodeId", Value::String(field_id.to_string()));
        }
        created.push(id);
    }
    created
}

/// The field block whose literal `code` matches `base`, if any.
pub fn field_with_code(registry: &NodeRegistry, base: &str) -> Option<NodeId> {
    registry
        .ids_of_kind(NodeKind::Block)
        .iter()
        .find(|id| {
            registry.ast(id).is_some_and(|node| {
                node.is_field_block() && node.string_prop("code") == Some(base)
            })
        })
        .cloned()
}

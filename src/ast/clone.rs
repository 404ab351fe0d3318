//! Deep-cloning of AST subtrees with fresh IDs.
//!
//! Used by the self-reference normalizer (cloning a field's `code`
//! subtree) and by runtime iteration (cloning the iterator template into
//! the overlay). Planning reads through a `NodeView`; registration writes
//! into a possibly different target registry, so the two phases are
//! separate calls.

use std::collections::HashMap;

use crate::ast::{AstNode, Node, PropValue};
use crate::id::{IdCategory, IdGenerator, NodeId};
use crate::registry::{NodeRegistry, NodeView, RegistryError};

pub struct ClonePlan {
    /// Nodes in parent-before-child order: `(node, parent-in-source, path)`.
    nodes: Vec<(AstNode, Option<NodeId>, String)>,
    root: NodeId,
}

/// Collect `root` and every AST descendant reachable through properties.
pub fn plan_clone(view: NodeView<'_>, root: &NodeId) -> Option<ClonePlan> {
    let mut nodes = Vec::new();
    let mut queue = vec![root.clone()];
    while let Some(id) = queue.pop() {
        let node = view.ast(&id)?;
        let parent = if id == *root {
            None
        } else {
            view.parent(&id).cloned()
        };
        let path = view.path(&id).unwrap_or_default().to_string();
        queue.extend(node.child_ids());
        nodes.push((node.clone(), parent, path));
    }
    Some(ClonePlan {
        nodes,
        root: root.clone(),
    })
}

impl ClonePlan {
    /// Number of nodes the plan will create.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register the clone into `target` under fresh `category` IDs.
    /// Returns the new root ID plus every ID created. Original IDs are
    /// stripped entirely; links between cloned nodes are remapped onto the
    /// fresh IDs.
    pub fn register(
        self,
        target: &mut NodeRegistry,
        ids: &mut IdGenerator,
        category: IdCategory,
        parent_of_root: Option<NodeId>,
        path_prefix: &str,
    ) -> Result<(NodeId, Vec<NodeId>), RegistryError> {
        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        let mut created = Vec::with_capacity(self.nodes.len());
        for (node, _, _) in &self.nodes {
            let fresh = ids.next(category);
            created.push(fresh.clone());
            remap.insert(node.id.clone(), fresh);
        }
        let new_root = remap[&self.root].clone();

        for (mut node, parent, path) in self.nodes {
            let old_id = node.id.clone();
            node.id = remap[&old_id].clone();
            for value in node.properties.values_mut() {
                remap_prop(value, &remap);
            }
            let parent = match parent {
                Some(old_parent) => remap.get(&old_parent).cloned().or(parent_of_root.clone()),
                None => parent_of_root.clone(),
            };
            let path = if path_prefix.is_empty() {
                path
            } else {
                format!("{}/{}", path_prefix, path)
            };
            target.register(Node::Ast(node), parent, path)?;
        }
        Ok((new_root, created))
    }
}

fn remap_prop(value: &mut PropValue, remap: &HashMap<NodeId, NodeId>) {
    match value {
        PropValue::Node(id) => {
            if let Some(new_id) = remap.get(id) {
                *id = new_id.clone();
            }
        }
        PropValue::List(items) => {
            for item in items {
                remap_prop(item, remap);
            }
        }
        PropValue::Map(entries) => {
            for entry in entries.values_mut() {
                remap_prop(entry, remap);
            }
        }
        PropValue::Value(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::raw::RawArena;
    use crate::ast::NodeKind;
    use serde_json::Value;
    use std::collections::BTreeMap;

    #[test]
    fn clone_remaps_internal_links() {
        let mut ids = IdGenerator::new();
        let mut arena = RawArena::new();
        let mut registry = NodeRegistry::new();

        let child_id = ids.next(IdCategory::CompileAst);
        let parent_id = ids.next(IdCategory::CompileAst);

        let child = AstNode {
            id: child_id.clone(),
            kind: NodeKind::Reference,
            properties: BTreeMap::new(),
            raw: arena.intern(Value::Null),
        };
        let mut props = BTreeMap::new();
        props.insert("goto".to_string(), PropValue::Node(child_id.clone()));
        let parent = AstNode {
            id: parent_id.clone(),
            kind: NodeKind::Next,
            properties: props,
            raw: arena.intern(Value::Null),
        };
        registry.register(Node::Ast(parent), None, "next").unwrap();
        registry
            .register(Node::Ast(child), Some(parent_id.clone()), "next.goto")
            .unwrap();

        let plan = plan_clone(NodeView::base_only(&registry), &parent_id).unwrap();
        assert_eq!(plan.len(), 2);
        let (new_root, created) = plan
            .register(
                &mut registry,
                &mut ids,
                IdCategory::RuntimeAst,
                None,
                "clone",
            )
            .unwrap();
        assert_eq!(created.len(), 2);

        assert_ne!(new_root, parent_id);
        let cloned = registry.ast(&new_root).unwrap();
        let cloned_child = cloned.node_prop("goto").unwrap();
        assert_ne!(cloned_child, &child_id);
        assert!(cloned_child.is_runtime());
        assert_eq!(registry.parent(cloned_child), Some(&new_root));
    }
}

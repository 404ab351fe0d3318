//! Wiring phase: populate the dependency graph.
//!
//! One module per node family, each exposing `wire_node`. The global
//! `wire()` pass walks the whole registry; `wire_nodes(ids)` is the scoped
//! pass used by runtime overlays on freshly registered nodes. Conventions:
//!
//! - Structural: `child → parent [STRUCTURAL]` for children of
//!   journey/step/block nodes.
//! - Expressions/predicates/transitions: `input → owner [DATA_FLOW]`
//!   tagged with the property name and list index, AST-node inputs only.
//! - Pseudo-nodes: producer edges onto matching references, plus
//!   transition → pseudo ordering edges (`onAccess` before `Data` reads,
//!   `onSubmission` before `Post`/`Answer` reads).

pub mod expressions;
pub mod predicates;
pub mod pseudo;
pub mod structural;
pub mod transitions;

use crate::ast::{Node, NodeKind};
use crate::graph::DependencyGraph;
use crate::id::NodeId;
use crate::normalize::scope::ScopeView;
use crate::registry::{MetadataView, NodeView};

/// Read-only views of the registries plus mutable access to the target
/// graph (the base graph at compile time, the overlay delta at runtime).
pub struct WiringContext<'a> {
    pub nodes: NodeView<'a>,
    pub metadata: MetadataView<'a>,
    pub scopes: ScopeView<'a>,
    pub graph: &'a mut DependencyGraph,
}

/// Global pass over every registered node.
pub fn wire(cx: &mut WiringContext<'_>, all_ids: &[NodeId]) {
    wire_nodes(cx, all_ids);
}

/// Scoped pass over `ids` only. Safe to call repeatedly; edge insertion
/// deduplicates identical triples.
pub fn wire_nodes(cx: &mut WiringContext<'_>, ids: &[NodeId]) {
    for id in ids {
        cx.graph.add_node(id);
    }
    for id in ids {
        let Some(node) = cx.nodes.get(id) else {
            continue;
        };
        match node {
            Node::Ast(ast) => {
                structural::wire_node(cx, ast);
                match ast.kind {
                    NodeKind::And | NodeKind::Or | NodeKind::Not | NodeKind::Test => {
                        predicates::wire_node(cx, ast)
                    }
                    NodeKind::Reference => {
                        expressions::wire_node(cx, ast);
                        pseudo::wire_reference(cx, ast);
                    }
                    NodeKind::Format
                    | NodeKind::Next
                    | NodeKind::Iterate
                    | NodeKind::Validation
                    | NodeKind::Function(_) => expressions::wire_node(cx, ast),
                    NodeKind::Load | NodeKind::Access | NodeKind::Submit | NodeKind::Action => {
                        transitions::wire_node(cx, ast)
                    }
                    NodeKind::Journey | NodeKind::Step | NodeKind::Block => {}
                }
            }
            Node::Pseudo(pseudo_node) => pseudo::wire_node(cx, pseudo_node),
        }
    }
}

//! Structural wiring: child → parent edges under structural nodes.

use crate::ast::AstNode;
use crate::graph::EdgeData;

use super::WiringContext;

pub fn wire_node(cx: &mut WiringContext<'_>, node: &AstNode) {
    let Some(parent) = cx.nodes.parent(&node.id) else {
        return;
    };
    let parent_is_structural = cx
        .nodes
        .ast(parent)
        .is_some_and(|p| p.kind.is_structural());
    if parent_is_structural {
        cx.graph.add_edge(&node.id, parent, EdgeData::structural());
    }
}

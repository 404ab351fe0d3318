//! Predicate wiring: operands feed their predicate node.

use crate::ast::{AstNode, NodeKind, PropValue};
use crate::graph::EdgeData;

use super::WiringContext;

pub fn wire_node(cx: &mut WiringContext<'_>, node: &AstNode) {
    match node.kind {
        NodeKind::And | NodeKind::Or => wire_operand_list(cx, node, "operands"),
        NodeKind::Not => wire_single(cx, node, "operand"),
        NodeKind::Test => {
            wire_single(cx, node, "subject");
            wire_single(cx, node, "condition");
        }
        _ => {}
    }
}

/// Primitive operands carry no dependency; only AST-node operands wire.
fn wire_operand_list(cx: &mut WiringContext<'_>, node: &AstNode, property: &str) {
    let Some(PropValue::List(operands)) = node.prop(property) else {
        return;
    };
    for (index, operand) in operands.iter().enumerate() {
        if let Some(operand_id) = operand.as_node() {
            cx.graph.add_edge(
                operand_id,
                &node.id,
                EdgeData::data_flow(property).with_index(index),
            );
        }
    }
}

fn wire_single(cx: &mut WiringContext<'_>, node: &AstNode, property: &str) {
    if let Some(input) = node.node_prop(property) {
        cx.graph
            .add_edge(input, &node.id, EdgeData::data_flow(property));
    }
}

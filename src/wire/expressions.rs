//! Expression wiring: function arguments, format arguments, navigation
//! gates, iteration inputs, validation predicates, and reference path
//! segments.

use crate::ast::{AstNode, NodeKind, PropValue};
use crate::graph::EdgeData;

use super::WiringContext;

pub fn wire_node(cx: &mut WiringContext<'_>, node: &AstNode) {
    match node.kind {
        NodeKind::Function(_) => wire_indexed_list(cx, node, "arguments"),
        NodeKind::Format => wire_indexed_list(cx, node, "arguments"),
        NodeKind::Next => {
            wire_single(cx, node, "when");
            wire_single(cx, node, "goto");
        }
        NodeKind::Iterate => wire_single(cx, node, "input"),
        NodeKind::Validation => {
            wire_single(cx, node, "when");
            wire_single(cx, node, "message");
            wire_single(cx, node, "details");
        }
        NodeKind::Reference => wire_indexed_list(cx, node, "path"),
        _ => {}
    }
}

fn wire_indexed_list(cx: &mut WiringContext<'_>, node: &AstNode, property: &str) {
    let Some(PropValue::List(items)) = node.prop(property) else {
        return;
    };
    for (index, item) in items.iter().enumerate() {
        if let Some(item_id) = item.as_node() {
            cx.graph.add_edge(
                item_id,
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

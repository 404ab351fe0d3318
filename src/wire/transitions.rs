//! Transition wiring: guards, effects, redirects, and navigation outcomes
//! feed their transition node.

use crate::ast::{AstNode, NodeKind, PropValue};
use crate::graph::EdgeData;
use crate::id::NodeId;

use super::WiringContext;

pub fn wire_node(cx: &mut WiringContext<'_>, node: &AstNode) {
    match node.kind {
        NodeKind::Load => {
            wire_list(cx, node, "effects");
            wire_list(cx, node, "next");
        }
        NodeKind::Access => {
            wire_single(cx, node, "guards");
            wire_list(cx, node, "effects");
            wire_list(cx, node, "redirect");
            wire_single(cx, node, "message");
            wire_list(cx, node, "next");
        }
        NodeKind::Submit => {
            wire_single(cx, node, "when");
            wire_single(cx, node, "validate");
            wire_branch(cx, node, "onValid");
            wire_branch(cx, node, "onInvalid");
        }
        NodeKind::Action => {
            wire_single(cx, node, "when");
            wire_list(cx, node, "effects");
        }
        _ => {}
    }
}

fn wire_single(cx: &mut WiringContext<'_>, node: &AstNode, property: &str) {
    if let Some(input) = node.node_prop(property) {
        cx.graph
            .add_edge(input, &node.id, EdgeData::data_flow(property));
    }
}

fn wire_list(cx: &mut WiringContext<'_>, node: &AstNode, property: &str) {
    let Some(PropValue::List(items)) = node.prop(property) else {
        // A lone node is accepted where a list is expected.
        wire_single(cx, node, property);
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

/// Submit branches (`onValid` / `onInvalid`) are plain objects holding
/// `effects` and `next` lists.
fn wire_branch(cx: &mut WiringContext<'_>, node: &AstNode, property: &str) {
    let Some(PropValue::Map(branch)) = node.prop(property) else {
        return;
    };
    for (sub, value) in branch {
        let qualified = format!("{}.{}", property, sub);
        wire_prop_value(cx, &node.id, &qualified, value);
    }
}

fn wire_prop_value(cx: &mut WiringContext<'_>, owner: &NodeId, property: &str, value: &PropValue) {
    match value {
        PropValue::Node(id) => {
            cx.graph.add_edge(id, owner, EdgeData::data_flow(property));
        }
        PropValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                if let Some(item_id) = item.as_node() {
                    cx.graph.add_edge(
                        item_id,
                        owner,
                        EdgeData::data_flow(property).with_index(index),
                    );
                }
            }
        }
        _ => {}
    }
}

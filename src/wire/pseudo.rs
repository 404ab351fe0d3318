//! Pseudo-node wiring.
//!
//! References bind to their producing pseudo-node; pseudo-nodes backed by
//! mutable request state additionally receive ordering edges from the
//! transitions that write that state (`onAccess` effects before `Data`
//! reads, `onSubmission` before `Post` and `Answer` reads).

use crate::ast::{AstNode, NodeKind, PropValue, PseudoKind, PseudoNode};
use crate::graph::EdgeData;
use crate::id::NodeId;
use crate::transform::pseudo::demand_of;

use super::WiringContext;

/// Producer edge for one reference node.
pub fn wire_reference(cx: &mut WiringContext<'_>, node: &AstNode) {
    let Some(PropValue::List(path)) = node.prop("path") else {
        return;
    };
    let Some((kind, base)) = demand_of(path) else {
        return;
    };
    // Inside a collection iteration the runtime layer shadows answers with
    // per-element pseudo-nodes.
    let producer = match kind {
        PseudoKind::Answer => cx
            .nodes
            .find_pseudo(PseudoKind::AnswerRemote, &base)
            .or_else(|| cx.nodes.find_pseudo(PseudoKind::Answer, &base)),
        other => cx.nodes.find_pseudo(other, &base),
    };
    let Some(producer) = producer else {
        return;
    };
    cx.graph.add_edge(
        &producer.id,
        &node.id,
        EdgeData::data_flow("path").with_reference(producer.kind, base),
    );
}

/// Ordering edges from writing transitions into the pseudo-node.
pub fn wire_node(cx: &mut WiringContext<'_>, pseudo: &PseudoNode) {
    match pseudo.kind {
        PseudoKind::Data => wire_writing_transitions(cx, pseudo, "onAccess"),
        PseudoKind::Post => wire_writing_transitions(cx, pseudo, "onSubmission"),
        PseudoKind::Answer => wire_answer_producer(cx, pseudo),
        PseudoKind::AnswerRemote | PseudoKind::Query | PseudoKind::Params => {}
    }
}

/// For every reference consuming `pseudo`, the nearest transition list of
/// `transition_property` up the consumer's scope chain writes before the
/// pseudo-node may be read.
fn wire_writing_transitions(
    cx: &mut WiringContext<'_>,
    pseudo: &PseudoNode,
    transition_property: &str,
) {
    for consumer in consuming_references(cx, pseudo) {
        let chain = cx.scopes.chain(&consumer).to_vec();
        for ancestor in chain.iter().rev() {
            let Some(node) = cx.nodes.ast(ancestor) else {
                continue;
            };
            let transitions = node.node_list_prop(transition_property);
            if transitions.is_empty() {
                continue;
            }
            for transition in transitions {
                cx.graph.add_edge(
                    &transition,
                    &pseudo.id,
                    EdgeData::data_flow(transition_property)
                        .with_reference(pseudo.kind, pseudo.base.clone()),
                );
            }
            break;
        }
    }
}

/// Answers are written by the owning field's step submission.
fn wire_answer_producer(cx: &mut WiringContext<'_>, pseudo: &PseudoNode) {
    let Some(field_id) = &pseudo.field_node else {
        return;
    };
    let Some(step_id) = cx.scopes.step_of(field_id) else {
        return;
    };
    let Some(step) = cx.nodes.ast(step_id) else {
        return;
    };
    for transition in step.node_list_prop("onSubmission") {
        cx.graph.add_edge(
            &transition,
            &pseudo.id,
            EdgeData::data_flow("onSubmission")
                .with_reference(pseudo.kind, pseudo.base.clone()),
        );
    }
}

fn consuming_references(cx: &WiringContext<'_>, pseudo: &PseudoNode) -> Vec<NodeId> {
    let wanted = match pseudo.kind {
        PseudoKind::AnswerRemote => PseudoKind::Answer,
        other => other,
    };
    cx.nodes
        .ids_of_kind(NodeKind::Reference)
        .into_iter()
        .filter(|id| {
            cx.nodes.ast(id).is_some_and(|node| {
                matches!(
                    node.prop("path"),
                    Some(PropValue::List(path))
                        if demand_of(path) == Some((wanted, pseudo.base.clone()))
                )
            })
        })
        .collect()
}

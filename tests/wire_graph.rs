//! Wiring tests: structural and data-flow edges over the compiled graph.

use engine::ast::{NodeKind, PseudoKind};
use engine::graph::EdgeKind;
use engine::program;

#[test]
fn every_edge_connects_registered_nodes() {
    let program = program::compile_str(include_str!("fixtures/email_validation.json")).unwrap();
    assert!(program.graph.edge_count() > 0);
    for (from, to, _) in program.graph.edges() {
        assert!(program.nodes.get(from).is_some(), "unregistered source {}", from);
        assert!(program.nodes.get(to).is_some(), "unregistered target {}", to);
    }
}

#[test]
fn structural_edges_point_child_to_parent() {
    let program = program::compile_str(include_str!("fixtures/trivial_journey.json")).unwrap();
    let step = program.nodes.ids_of_kind(NodeKind::Step)[0].clone();

    let edges = program.graph.out_edges(&step);
    let (parent, data) = edges
        .iter()
        .find(|(_, data)| data.kind == EdgeKind::Structural)
        .expect("step has a structural edge");
    assert_eq!(*parent, &program.journey);
    assert_eq!(data.relation.as_deref(), Some("child-parent"));
}

#[test]
fn primitive_operands_are_not_wired() {
    let program = program::compile_str(include_str!("fixtures/short_circuit.json")).unwrap();
    let and = program.nodes.ids_of_kind(NodeKind::And)[0].clone();

    // Operands are `[false, <condition fn>]`: only the function node wires.
    let incoming = program.graph.in_edges(&and);
    assert_eq!(incoming.len(), 1);
    let (producer, data) = &incoming[0];
    assert_eq!(data.property.as_deref(), Some("operands"));
    assert_eq!(data.index, Some(1));
    assert_eq!(
        program.nodes.ast(producer).unwrap().kind.discriminator(),
        "Function.Condition"
    );
}

#[test]
fn answer_pseudo_produces_into_matching_references() {
    let program = program::compile_str(include_str!("fixtures/email_validation.json")).unwrap();
    let pseudo = program
        .nodes
        .find_pseudo(PseudoKind::Answer, "email")
        .expect("answers.email pseudo-node materialized");

    let consumers = program.graph.data_flow_out(&pseudo.id);
    let reference_count = consumers
        .iter()
        .filter(|id| {
            program
                .nodes
                .ast(id)
                .is_some_and(|node| node.kind == NodeKind::Reference)
        })
        .count();
    // Both the validation subject and the field's implicit value.
    assert_eq!(reference_count, 2);

    for (_, data) in program.graph.out_edges(&pseudo.id) {
        if data.reference_type.is_some() {
            assert_eq!(data.reference_type, Some(PseudoKind::Answer));
            assert_eq!(data.field_code.as_deref(), Some("email"));
        }
    }
}

#[test]
fn submission_transitions_write_before_answers_are_read() {
    let program = program::compile_str(include_str!("fixtures/email_validation.json")).unwrap();
    let pseudo = program
        .nodes
        .find_pseudo(PseudoKind::Answer, "email")
        .unwrap();
    let submit = program.nodes.ids_of_kind(NodeKind::Submit)[0].clone();

    let producers = program.graph.data_flow_in(&pseudo.id);
    assert!(
        producers.contains(&submit),
        "answer pseudo-node lacks its writing transition"
    );
}

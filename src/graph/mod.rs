//! petgraph-based dependency graph over AST and pseudo-nodes.
//!
//! Two edge kinds: `Structural` (child → parent) and `DataFlow`
//! (producer → consumer). The compiled program owns one base graph; each
//! runtime overlay owns a delta graph, and `GraphView` unions the two for
//! queries.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::ast::PseudoKind;
use crate::id::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Structural,
    DataFlow,
}

/// Structured edge annotation. Duplicate `(from, to, kind)` pairs are
/// permitted only when this metadata differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    pub kind: EdgeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<PseudoKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_code: Option<String>,
}

impl EdgeData {
    pub fn structural() -> Self {
        EdgeData {
            kind: EdgeKind::Structural,
            relation: Some("child-parent".to_string()),
            property: None,
            index: None,
            reference_type: None,
            base_property: None,
            field_code: None,
        }
    }

    pub fn data_flow(property: impl Into<String>) -> Self {
        EdgeData {
            kind: EdgeKind::DataFlow,
            relation: None,
            property: Some(property.into()),
            index: None,
            reference_type: None,
            base_property: None,
            field_code: None,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Record which external source backs this edge so cache invalidation
    /// can cascade by field code or data property.
    pub fn with_reference(mut self, kind: PseudoKind, base: impl Into<String>) -> Self {
        self.reference_type = Some(kind);
        match kind {
            PseudoKind::Answer | PseudoKind::AnswerRemote | PseudoKind::Post => {
                self.field_code = Some(base.into());
            }
            PseudoKind::Data | PseudoKind::Query | PseudoKind::Params => {
                self.base_property = Some(base.into());
            }
        }
        self
    }
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<NodeId, EdgeData>,
    node_indices: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    /// Idempotent node insertion.
    pub fn add_node(&mut self, id: &NodeId) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.node_indices.insert(id.clone(), idx);
        idx
    }

    /// Add an edge, registering endpoints as needed. An identical
    /// `(from, to, data)` triple is dropped; returns whether the edge was
    /// actually inserted.
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, data: EdgeData) -> bool {
        use petgraph::visit::EdgeRef;
        let from_idx = self.add_node(from);
        let to_idx = self.add_node(to);
        let duplicate = self
            .graph
            .edges_connecting(from_idx, to_idx)
            .any(|edge| edge.weight() == &data);
        if duplicate {
            return false;
        }
        self.graph.add_edge(from_idx, to_idx, data);
        true
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_indices.contains_key(id)
    }

    /// Incoming edges: `(producer, edge)` pairs.
    pub fn in_edges(&self, id: &NodeId) -> Vec<(&NodeId, &EdgeData)> {
        self.neighbor_edges(id, Direction::Incoming)
    }

    /// Outgoing edges: `(consumer, edge)` pairs.
    pub fn out_edges(&self, id: &NodeId) -> Vec<(&NodeId, &EdgeData)> {
        self.neighbor_edges(id, Direction::Outgoing)
    }

    fn neighbor_edges(&self, id: &NodeId, dir: Direction) -> Vec<(&NodeId, &EdgeData)> {
        use petgraph::visit::EdgeRef;
        let Some(&idx) = self.node_indices.get(id) else {
            return vec![];
        };
        self.graph
            .edges_directed(idx, dir)
            .map(|edge| {
                let other = match dir {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                (&self.graph[other], edge.weight())
            })
            .collect()
    }

    pub fn data_flow_out(&self, id: &NodeId) -> Vec<NodeId> {
        self.out_edges(id)
            .into_iter()
            .filter(|(_, data)| data.kind == EdgeKind::DataFlow)
            .map(|(other, _)| other.clone())
            .collect()
    }

    pub fn data_flow_in(&self, id: &NodeId) -> Vec<NodeId> {
        self.in_edges(id)
            .into_iter()
            .filter(|(_, data)| data.kind == EdgeKind::DataFlow)
            .map(|(other, _)| other.clone())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All edges as `(from, to, data)` triples, for summaries and tests.
    pub fn edges(&self) -> Vec<(&NodeId, &NodeId, &EdgeData)> {
        use petgraph::visit::EdgeRef;
        self.graph
            .edge_references()
            .map(|edge| {
                (
                    &self.graph[edge.source()],
                    &self.graph[edge.target()],
                    edge.weight(),
                )
            })
            .collect()
    }
}

/// Union view over the compiled graph and a runtime delta.
#[derive(Clone, Copy)]
pub struct GraphView<'a> {
    base: &'a DependencyGraph,
    delta: Option<&'a DependencyGraph>,
}

impl<'a> GraphView<'a> {
    pub fn base_only(base: &'a DependencyGraph) -> Self {
        GraphView { base, delta: None }
    }

    pub fn layered(base: &'a DependencyGraph, delta: &'a DependencyGraph) -> Self {
        GraphView {
            base,
            delta: Some(delta),
        }
    }

    pub fn in_edges(&self, id: &NodeId) -> Vec<(&'a NodeId, &'a EdgeData)> {
        let mut edges = self.base.in_edges(id);
        if let Some(delta) = self.delta {
            edges.extend(delta.in_edges(id));
        }
        edges
    }

    pub fn data_flow_in(&self, id: &NodeId) -> Vec<NodeId> {
        let mut ids = self.base.data_flow_in(id);
        if let Some(delta) = self.delta {
            ids.extend(delta.data_flow_in(id));
        }
        ids
    }

    pub fn data_flow_out(&self, id: &NodeId) -> Vec<NodeId> {
        let mut ids = self.base.data_flow_out(id);
        if let Some(delta) = self.delta {
            ids.extend(delta.data_flow_out(id));
        }
        ids
    }

    /// Every node reachable from `id` along `DATA_FLOW` edges, excluding
    /// `id` itself. Used by cascading cache invalidation.
    pub fn data_flow_reachable(&self, id: &NodeId) -> Vec<NodeId> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.data_flow_out(id).into();
        let mut order = Vec::new();
        while let Some(next) = queue.pop_front() {
            if next == *id || !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.data_flow_out(&next));
            order.push(next);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{IdCategory, IdGenerator};

    fn ids(n: usize) -> Vec<NodeId> {
        let mut generator = IdGenerator::new();
        (0..n).map(|_| generator.next(IdCategory::CompileAst)).collect()
    }

    #[test]
    fn identical_edges_are_deduplicated() {
        let nodes = ids(2);
        let mut graph = DependencyGraph::new();
        graph.add_edge(&nodes[0], &nodes[1], EdgeData::data_flow("operands"));
        graph.add_edge(&nodes[0], &nodes[1], EdgeData::data_flow("operands"));
        graph.add_edge(
            &nodes[0],
            &nodes[1],
            EdgeData::data_flow("operands").with_index(1),
        );
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn reachability_follows_data_flow_only() {
        let nodes = ids(4);
        let mut graph = DependencyGraph::new();
        graph.add_edge(&nodes[0], &nodes[1], EdgeData::data_flow("value"));
        graph.add_edge(&nodes[1], &nodes[2], EdgeData::data_flow("value"));
        graph.add_edge(&nodes[1], &nodes[3], EdgeData::structural());

        let view = GraphView::base_only(&graph);
        let reachable = view.data_flow_reachable(&nodes[0]);
        assert!(reachable.contains(&nodes[1]));
        assert!(reachable.contains(&nodes[2]));
        assert!(!reachable.contains(&nodes[3]));
    }

    #[test]
    fn layered_view_unions_edges() {
        let nodes = ids(3);
        let mut base = DependencyGraph::new();
        let mut delta = DependencyGraph::new();
        base.add_edge(&nodes[0], &nodes[1], EdgeData::data_flow("a"));
        delta.add_edge(&nodes[1], &nodes[2], EdgeData::data_flow("b"));

        let view = GraphView::layered(&base, &delta);
        let reachable = view.data_flow_reachable(&nodes[0]);
        assert_eq!(reachable, vec![nodes[1].clone(), nodes[2].clone()]);
    }
}

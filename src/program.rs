//! Compile orchestrator: declarative JSON → `Program`.
//!
//! Runs the full pipeline (transform, normalize, pseudo-node
//! materialization, scope indexing, wiring, route table, handler
//! registration) and returns the immutable compiled artefact shared by
//! every evaluator.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::ast::raw::RawArena;
use crate::ast::NodeKind;
use crate::error::{EngineError, ErrorKind};
use crate::eval::handlers::{self, ThunkHandlerRegistry};
use crate::graph::{DependencyGraph, EdgeKind};
use crate::id::{IdCategory, IdGenerator, NodeId};
use crate::normalize;
use crate::normalize::scope::{ScopeIndex, ScopeView};
use crate::registry::{MetadataRegistry, MetadataView, NodeRegistry, NodeView};
use crate::transform::{self, TransformContext};
use crate::wire;

/// One compiled form version. Read-only during evaluation; evaluators
/// layer per-request overlays on top.
#[derive(Debug)]
pub struct Program {
    pub nodes: NodeRegistry,
    pub metadata: MetadataRegistry,
    pub handlers: ThunkHandlerRegistry,
    pub graph: DependencyGraph,
    pub scopes: ScopeIndex,
    pub arena: RawArena,
    pub journey: NodeId,
    /// Effective route → step, ancestor journey paths included.
    pub routes: BTreeMap<String, NodeId>,
    /// Final generator state; runtime overlays continue from it.
    pub ids: IdGenerator,
}

impl Program {
    pub fn resolve_step(&self, path: &str) -> Option<&NodeId> {
        self.routes.get(&join_route(&[path]))
    }

    /// The declarative source subtree a node was compiled from, for error
    /// reporting and tooling.
    pub fn raw_source(&self, id: &NodeId) -> Option<&Value> {
        let node = self.nodes.ast(id)?;
        Some(self.arena.get(node.raw))
    }

    /// Entry step: the journey's `entryPath` route when declared, else the
    /// first step flagged `isEntryPoint`, else the first route.
    pub fn entry_step(&self) -> Option<&NodeId> {
        if let Some(journey) = self.nodes.ast(&self.journey) {
            if let Some(entry_path) = journey.string_prop("entryPath") {
                if let Some(step) = self.resolve_step(entry_path) {
                    return Some(step);
                }
            }
        }
        for step_id in self.nodes.ids_of_kind(NodeKind::Step) {
            let is_entry = self
                .nodes
                .ast(step_id)
                .and_then(|step| step.prop("isEntryPoint"))
                .and_then(crate::ast::PropValue::as_bool)
                .unwrap_or(false);
            if is_entry {
                return Some(step_id);
            }
        }
        self.routes.values().next()
    }

    pub fn summary(&self) -> ProgramSummary {
        let mut nodes_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for node in self.nodes.iter() {
            *nodes_by_kind.entry(node.label().to_string()).or_default() += 1;
        }
        let mut structural_edges = 0;
        let mut data_flow_edges = 0;
        for (_, _, data) in self.graph.edges() {
            match data.kind {
                EdgeKind::Structural => structural_edges += 1,
                EdgeKind::DataFlow => data_flow_edges += 1,
            }
        }
        ProgramSummary {
            nodes: self.nodes.len(),
            nodes_by_kind,
            structural_edges,
            data_flow_edges,
            routes: self.routes.keys().cloned().collect(),
        }
    }
}

/// Serialisable digest of a compiled program, for tooling and snapshots.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSummary {
    pub nodes: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub structural_edges: usize,
    pub data_flow_edges: usize,
    pub routes: Vec<String>,
}

/// Compile a declarative journey from its JSON source text.
pub fn compile_str(json: &str) -> Result<Program, Vec<EngineError>> {
    let value: Value = serde_json::from_str(json).map_err(|err| {
        vec![EngineError::new(
            ErrorKind::Invalid,
            format!("failed to parse declarative JSON: {}", err),
        )]
    })?;
    compile(&value)
}

/// Compile a declarative journey tree.
pub fn compile(value: &Value) -> Result<Program, Vec<EngineError>> {
    let mut ids = IdGenerator::new();
    let mut nodes = NodeRegistry::new();
    let mut arena = RawArena::new();

    let journey = {
        let mut cx = TransformContext::new(&mut ids, &mut nodes, &mut arena, IdCategory::CompileAst);
        transform::transform(value, &mut cx)?
    };
    let root_kind = nodes.ast(&journey).map(|node| node.kind);
    if root_kind != Some(NodeKind::Journey) {
        return Err(vec![
            EngineError::new(
                ErrorKind::Invalid,
                "declarative root must be a Structure.Journey",
            )
            .with_node(journey),
        ]);
    }

    normalize::normalize(&mut nodes, &mut ids, &mut arena)?;

    let mut metadata = MetadataRegistry::new();
    let mut errors = Vec::new();
    transform::pseudo::materialize(
        &mut nodes,
        &mut metadata,
        &mut ids,
        IdCategory::CompilePseudo,
        None,
        &mut errors,
    );
    if !errors.is_empty() {
        return Err(errors);
    }

    let scopes = ScopeIndex::build(&nodes);

    let mut graph = DependencyGraph::new();
    {
        let mut all_ids: Vec<NodeId> = nodes.ids().cloned().collect();
        all_ids.sort();
        let mut cx = wire::WiringContext {
            nodes: NodeView::base_only(&nodes),
            metadata: MetadataView::base_only(&metadata),
            scopes: ScopeView::base_only(&scopes),
            graph: &mut graph,
        };
        wire::wire(&mut cx, &all_ids);
    }

    let routes = build_routes(&nodes, &scopes)?;

    let handlers = handlers::build_registry(&nodes)
        .map_err(|err| vec![EngineError::new(ErrorKind::DuplicateId, err.to_string())])?;

    log::debug!(
        "compiled journey {}: {} nodes, {} edges, {} routes",
        journey,
        nodes.len(),
        graph.edge_count(),
        routes.len()
    );

    Ok(Program {
        nodes,
        metadata,
        handlers,
        graph,
        scopes,
        arena,
        journey,
        routes,
        ids,
    })
}

/// Steps are addressable by their journey-qualified path. Two steps on
/// the same effective route reject the whole compilation.
fn build_routes(
    nodes: &NodeRegistry,
    scopes: &ScopeIndex,
) -> Result<BTreeMap<String, NodeId>, Vec<EngineError>> {
    let mut routes = BTreeMap::new();
    let mut errors = Vec::new();
    for step_id in nodes.ids_of_kind(NodeKind::Step) {
        let Some(step) = nodes.ast(step_id) else {
            continue;
        };
        let Some(step_path) = step.string_prop("path") else {
            continue;
        };
        let mut parts: Vec<&str> = Vec::new();
        for ancestor in scopes.chain(step_id) {
            if ancestor == step_id {
                continue;
            }
            let Some(node) = nodes.ast(ancestor) else {
                continue;
            };
            if node.kind == NodeKind::Journey {
                if let Some(path) = node.string_prop("path") {
                    parts.push(path);
                }
            }
        }
        parts.push(step_path);
        let route = join_route(&parts);
        if let Some(existing) = routes.insert(route.clone(), step_id.clone()) {
            errors.push(
                EngineError::new(
                    ErrorKind::DuplicateRoute,
                    format!("steps '{}' and '{}' share route '{}'", existing, step_id, route),
                )
                .with_node(step_id.clone()),
            );
        }
    }
    if errors.is_empty() {
        Ok(routes)
    } else {
        Err(errors)
    }
}

fn join_route(parts: &[&str]) -> String {
    let mut route = String::new();
    for part in parts {
        let trimmed = part.trim_matches('/');
        if !trimmed.is_empty() {
            route.push('/');
            route.push_str(trimmed);
        }
    }
    if route.is_empty() {
        "/".to_string()
    } else {
        route
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_join_and_normalize() {
        assert_eq!(join_route(&["/j", "/s"]), "/j/s");
        assert_eq!(join_route(&["/j/", "s/"]), "/j/s");
        assert_eq!(join_route(&["/"]), "/");
        assert_eq!(join_route(&[]), "/");
    }
}

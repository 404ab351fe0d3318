//! Cache versioning: cascading invalidation and the mid-evaluation retry
//! loop.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::json;

use engine::ast::{NodeKind, PseudoKind};
use engine::eval::context::{EvalContext, EvaluationRequest};
use engine::eval::handlers::{HandlerMode, ThunkHandler, ThunkResult};
use engine::eval::overlay::RuntimeHooks;
use engine::eval::{EvalEvent, EvalObserver, Evaluator};
use engine::graph::EdgeData;
use engine::id::{IdCategory, NodeId};
use engine::program;

#[tokio::test]
async fn invalidation_cascades_along_data_flow_edges() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/email_validation.json")).unwrap());
    let evaluator = Evaluator::new(program.clone(), Arc::new(helpers::registry_with_effects().0));

    let pseudo = program
        .nodes
        .find_pseudo(PseudoKind::Answer, "email")
        .unwrap()
        .id
        .clone();
    let downstream: Vec<NodeId> = program.graph.data_flow_out(&pseudo);
    assert!(!downstream.is_empty());
    let unrelated = program.journey.clone();

    let before_pseudo = evaluator.version(&pseudo);
    evaluator.invalidate_cascading(&pseudo);

    assert!(evaluator.version(&pseudo) > before_pseudo);
    for node in &downstream {
        assert!(
            evaluator.version(node) > 0,
            "consumer {} was not invalidated",
            node
        );
    }
    assert_eq!(evaluator.version(&unrelated), 0);
}

#[tokio::test]
async fn invalidation_reaches_transitive_consumers() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/email_validation.json")).unwrap());
    let evaluator = Evaluator::new(program.clone(), Arc::new(helpers::registry_with_effects().0));

    // answers.email → reference → test → not → validation
    let pseudo = program
        .nodes
        .find_pseudo(PseudoKind::Answer, "email")
        .unwrap()
        .id
        .clone();
    let validation = program.nodes.ids_of_kind(NodeKind::Validation)[0].clone();

    evaluator.invalidate_cascading(&pseudo);
    assert!(
        evaluator.version(&validation) > 0,
        "validation did not see the cascade"
    );
}

// =============================================================================
// RETRY LOOP
// =============================================================================

#[derive(Default)]
struct RetryRecorder {
    retries: AtomicU32,
}

impl EvalObserver for RetryRecorder {
    fn on_event(&self, event: &EvalEvent) {
        if let EvalEvent::Retry { .. } = event {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A handler that, on its first run, registers a runtime node whose
/// out-edge targets the handler's own node.
struct SelfInvalidatingHandler {
    id: NodeId,
    expanded: AtomicBool,
}

#[async_trait]
impl ThunkHandler for SelfInvalidatingHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn source(&self) -> &'static str {
        "SelfInvalidatingHandler"
    }

    fn mode(&self) -> HandlerMode {
        HandlerMode::Async
    }

    async fn evaluate(
        &self,
        _cx: &EvalContext,
        ev: &Evaluator,
        hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult {
        if !self.expanded.swap(true, Ordering::SeqCst) {
            let producer = ev.next_runtime_id(IdCategory::RuntimeAst);
            hooks.add_edge(&producer, &self.id, EdgeData::data_flow("contrived"));
            hooks.register_runtime_nodes_batch();
        }
        ThunkResult::value(json!(42), self.source())
    }
}

#[tokio::test]
async fn runtime_expansion_triggers_exactly_one_retry() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/trivial_journey.json")).unwrap());
    let recorder = Arc::new(RetryRecorder::default());
    let evaluator = Evaluator::new(program, Arc::new(helpers::base_registry()))
        .with_observer(recorder.clone());

    let node = evaluator.next_runtime_id(IdCategory::RuntimeAst);
    evaluator
        .register_runtime_handler(Arc::new(SelfInvalidatingHandler {
            id: node.clone(),
            expanded: AtomicBool::new(false),
        }))
        .unwrap();

    let cx = evaluator.create_context(EvaluationRequest::default());
    let result = evaluator.invoke(&node, &cx).await;

    assert_eq!(result.value, Some(json!(42)));
    assert!(result.error.is_none());
    assert_eq!(
        recorder.retries.load(Ordering::SeqCst),
        1,
        "expansion must invalidate the in-flight evaluation exactly once"
    );
}

#[tokio::test]
async fn missing_handlers_produce_a_structured_error() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/trivial_journey.json")).unwrap());
    let evaluator = Evaluator::new(program, Arc::new(helpers::base_registry()));
    let cx = evaluator.create_context(EvaluationRequest::default());

    let unknown = evaluator.next_runtime_id(IdCategory::RuntimeAst);
    let result = evaluator.invoke(&unknown, &cx).await;
    assert_eq!(
        result.error.map(|error| error.kind),
        Some(engine::error::ErrorKind::HandlerNotFound)
    );
}

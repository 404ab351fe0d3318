//! Collection iteration: runtime-node expansion and cache invalidation.

mod helpers;

use std::sync::Arc;

use serde_json::{Value, json};

use engine::ast::{NodeKind, PropValue};
use engine::eval::Evaluator;
use engine::eval::context::EvaluationRequest;
use engine::id::NodeId;
use engine::program::{self, Program};

fn data_items_reference(program: &Program) -> NodeId {
    program
        .nodes
        .ids_of_kind(NodeKind::Reference)
        .iter()
        .find(|id| {
            let reference = program.nodes.ast(id).unwrap();
            matches!(
                reference.prop("path"),
                Some(PropValue::List(path))
                    if path.first().and_then(PropValue::as_str) == Some("data")
            )
        })
        .cloned()
        .unwrap()
}

#[tokio::test]
async fn iterate_yields_one_record_per_element_with_item_scope() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/iterate_collection.json")).unwrap());
    let evaluator = Evaluator::new(program.clone(), Arc::new(helpers::base_registry()));
    let request = EvaluationRequest::default()
        .with_data("items", json!([{"x": 1}, {"x": 2}, {"x": 3}]));
    let cx = evaluator.create_context(request);

    let iterate = program.nodes.ids_of_kind(NodeKind::Iterate)[0].clone();
    let result = evaluator.invoke(&iterate, &cx).await;
    assert!(result.error.is_none(), "{:?}", result.error);

    let yields = result.value.and_then(|v| v.as_array().cloned()).unwrap();
    assert_eq!(yields.len(), 3);
    for (index, yielded) in yields.iter().enumerate() {
        let record = &yielded.as_array().unwrap()[0];
        assert_eq!(
            record.pointer("/properties/value"),
            Some(&json!(index as i64 + 1)),
            "field inside iteration reads the @item element"
        );
    }
}

#[tokio::test]
async fn iterate_expansion_bumps_versions_of_input_consumers() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/iterate_collection.json")).unwrap());
    let evaluator = Evaluator::new(program.clone(), Arc::new(helpers::base_registry()));
    let request = EvaluationRequest::default()
        .with_data("items", json!([{"x": 1}, {"x": 2}]));
    let cx = evaluator.create_context(request);

    let input_reference = data_items_reference(&program);
    let before = evaluator.version(&input_reference);

    let iterate = program.nodes.ids_of_kind(NodeKind::Iterate)[0].clone();
    let result = evaluator.invoke(&iterate, &cx).await;
    assert!(result.error.is_none(), "{:?}", result.error);

    let after = evaluator.version(&input_reference);
    assert!(
        after > before,
        "expansion must invalidate references into the input dataset ({} -> {})",
        before,
        after
    );
}

#[tokio::test]
async fn iterate_renders_through_the_whole_journey() {
    let program = Arc::new(program::compile_str(include_str!("fixtures/iterate_collection.json")).unwrap());
    let evaluator = Evaluator::new(program.clone(), Arc::new(helpers::base_registry()));
    let request = EvaluationRequest::default()
        .with_data("items", json!([{"x": "a"}, {"x": "b"}]));
    let cx = evaluator.create_context(request);

    let output = evaluator.evaluate(&cx).await;
    assert!(output.journey.error.is_none());
    let value = output.journey.value.unwrap();
    let items = value
        .pointer("/properties/steps/0/properties/blocks/0/properties/items")
        .and_then(Value::as_array)
        .unwrap();
    assert_eq!(items.len(), 2);
}

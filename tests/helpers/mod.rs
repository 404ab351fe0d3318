//! Shared test fixtures: a small function registry and invocation counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;

use engine::ast::FunctionType;
use engine::functions::FunctionRegistry;

/// Conditions every fixture journey relies on.
pub fn base_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register_fn(FunctionType::Condition, "isRequired", |_cx, args| {
        let present = match args.first() {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        };
        Ok(Value::Bool(present))
    });
    registry.register_fn(FunctionType::Condition, "equals", |_cx, args| {
        Ok(Value::Bool(args.first() == args.get(1)))
    });
    registry
}

/// Register a condition that counts its invocations and returns `outcome`.
pub fn counting_condition(
    registry: &mut FunctionRegistry,
    name: &str,
    outcome: bool,
) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    registry.register_fn(FunctionType::Condition, name, move |_cx, _args| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Bool(outcome))
    });
    counter
}

/// Register a condition that always fails evaluation.
pub fn failing_condition(registry: &mut FunctionRegistry, name: &str) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    registry.register_fn(FunctionType::Condition, name, move |_cx, _args| {
        seen.fetch_add(1, Ordering::SeqCst);
        Err("deliberately failing".to_string())
    });
    counter
}

/// Register an effect that counts its invocations.
pub fn counting_effect(registry: &mut FunctionRegistry, name: &str) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    registry.register_fn(FunctionType::Effect, name, move |_cx, _args| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    });
    counter
}

/// Base registry plus the submit-branch effects the validation fixture
/// declares, with their invocation counters.
pub fn registry_with_effects() -> (FunctionRegistry, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let mut registry = base_registry();
    let valid = counting_effect(&mut registry, "markValid");
    let invalid = counting_effect(&mut registry, "markInvalid");
    (registry, valid, invalid)
}

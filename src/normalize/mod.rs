//! Normalization phase: structural passes over the freshly transformed AST.
//!
//! Runs after the transformer and before wiring:
//! 1. `AddSelfValueToFields`: every field block gets an implicit
//!    `Reference(["answers", "@self"])` as its `value`.
//! 2. `ResolveSelfReferences`: every `@self` segment is replaced by the
//!    owning field's `code` (string or cloned expression subtree).
//!
//! The scope index is built separately once the registry is final.

pub mod scope;
pub mod self_refs;

use crate::ast::raw::RawArena;
use crate::error::EngineError;
use crate::id::IdGenerator;
use crate::registry::NodeRegistry;

pub fn normalize(
    registry: &mut NodeRegistry,
    ids: &mut IdGenerator,
    arena: &mut RawArena,
) -> Result<(), Vec<EngineError>> {
    let mut errors = Vec::new();
    self_refs::add_self_value_to_fields(registry, ids, arena, &mut errors);
    self_refs::resolve_self_references(registry, ids, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

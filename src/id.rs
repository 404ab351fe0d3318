//! Category-tagged node identifiers.
//!
//! Every AST node and pseudo-node gets an ID of the form
//! `<category>:<ordinal>`. Compile categories are handed out once per
//! compilation; runtime categories come from a per-request generator so
//! overlay nodes can never collide with compiled ones.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdCategory {
    CompileAst,
    CompilePseudo,
    RuntimeAst,
    RuntimePseudo,
}

impl IdCategory {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdCategory::CompileAst => "compile_ast",
            IdCategory::CompilePseudo => "compile_pseudo",
            IdCategory::RuntimeAst => "runtime_ast",
            IdCategory::RuntimePseudo => "runtime_pseudo",
        }
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, IdCategory::RuntimeAst | IdCategory::RuntimePseudo)
    }
}

/// Opaque node identifier. Cheap to clone, hashable, ordered, and stable
/// within one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub(crate) fn new(category: IdCategory, ordinal: u64) -> Self {
        NodeId(format!("{}:{}", category.prefix(), ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> Option<IdCategory> {
        let prefix = self.0.split(':').next()?;
        match prefix {
            "compile_ast" => Some(IdCategory::CompileAst),
            "compile_pseudo" => Some(IdCategory::CompilePseudo),
            "runtime_ast" => Some(IdCategory::RuntimeAst),
            "runtime_pseudo" => Some(IdCategory::RuntimePseudo),
            _ => None,
        }
    }

    pub fn is_runtime(&self) -> bool {
        self.category().is_some_and(|c| c.is_runtime())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic per-category counter. One lives for the whole compilation;
/// each runtime overlay continues from a clone of the compile-time state
/// so runtime IDs never collide with the compiled program's.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    counters: [u64; 4],
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator::default()
    }

    pub fn next(&mut self, category: IdCategory) -> NodeId {
        let slot = match category {
            IdCategory::CompileAst => 0,
            IdCategory::CompilePseudo => 1,
            IdCategory::RuntimeAst => 2,
            IdCategory::RuntimePseudo => 3,
        };
        let ordinal = self.counters[slot];
        self.counters[slot] += 1;
        NodeId::new(category, ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_per_category() {
        let mut generator = IdGenerator::new();
        let a = generator.next(IdCategory::CompileAst);
        let b = generator.next(IdCategory::CompileAst);
        let p = generator.next(IdCategory::CompilePseudo);
        assert_eq!(a.as_str(), "compile_ast:0");
        assert_eq!(b.as_str(), "compile_ast:1");
        assert_eq!(p.as_str(), "compile_pseudo:0");
        assert_ne!(a, b);
    }

    #[test]
    fn category_round_trips() {
        let mut generator = IdGenerator::new();
        let id = generator.next(IdCategory::RuntimePseudo);
        assert_eq!(id.category(), Some(IdCategory::RuntimePseudo));
        assert!(id.is_runtime());
    }
}

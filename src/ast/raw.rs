//! Append-only arena of declarative source subtrees.
//!
//! Nodes keep a `RawId` back-pointer instead of owning their source JSON,
//! so error reporting can show the original declaration without reference
//! cycles in the node model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawId(usize);

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RawArena {
    items: Vec<Value>,
}

impl RawArena {
    pub fn new() -> Self {
        RawArena::default()
    }

    pub fn intern(&mut self, value: Value) -> RawId {
        let id = RawId(self.items.len());
        self.items.push(value);
        id
    }

    pub fn get(&self, id: RawId) -> &Value {
        &self.items[id.0]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_values_are_stable() {
        let mut arena = RawArena::new();
        let a = arena.intern(serde_json::json!({"type": "Structure.Step"}));
        let b = arena.intern(Value::Null);
        assert_ne!(a, b);
        assert_eq!(arena.get(a)["type"], "Structure.Step");
        assert_eq!(arena.get(b), &Value::Null);
    }
}

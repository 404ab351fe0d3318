//! Compiled AST node model.
//!
//! The transformer turns declarative JSON into `AstNode` records keyed by
//! `NodeId`. Nodes are owned by the `NodeRegistry`; properties refer to
//! child nodes by ID, never by pointer, so the compiled program can be
//! shared read-only across requests.

pub mod clone;
pub mod raw;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::NodeId;
use raw::RawId;

// =============================================================================
// NODE KINDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionType {
    Condition,
    Transformer,
    Effect,
    Generator,
}

impl FunctionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionType::Condition => "Condition",
            FunctionType::Transformer => "Transformer",
            FunctionType::Effect => "Effect",
            FunctionType::Generator => "Generator",
        }
    }
}

/// Closed set of AST node kinds, discriminated in the declarative input by
/// the `type` property (`"Structure.Journey"`, `"Predicate.And"`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    // Structure
    Journey,
    Step,
    Block,
    // Expression
    Reference,
    Format,
    Next,
    Iterate,
    Validation,
    Function(FunctionType),
    // Predicate
    And,
    Or,
    Not,
    Test,
    // Transition
    Load,
    Access,
    Submit,
    Action,
}

impl NodeKind {
    pub fn from_discriminator(discriminator: &str) -> Option<NodeKind> {
        Some(match discriminator {
            "Structure.Journey" => NodeKind::Journey,
            "Structure.Step" => NodeKind::Step,
            "Structure.Block" => NodeKind::Block,
            "Expression.Reference" => NodeKind::Reference,
            "Expression.Format" => NodeKind::Format,
            "Expression.Next" => NodeKind::Next,
            "Expression.Iterate" => NodeKind::Iterate,
            "Expression.Validation" => NodeKind::Validation,
            "Function.Condition" => NodeKind::Function(FunctionType::Condition),
            "Function.Transformer" => NodeKind::Function(FunctionType::Transformer),
            "Function.Effect" => NodeKind::Function(FunctionType::Effect),
            "Function.Generator" => NodeKind::Function(FunctionType::Generator),
            "Predicate.And" => NodeKind::And,
            "Predicate.Or" => NodeKind::Or,
            "Predicate.Not" => NodeKind::Not,
            "Predicate.Test" => NodeKind::Test,
            "Transition.Load" => NodeKind::Load,
            "Transition.Access" => NodeKind::Access,
            "Transition.Submit" => NodeKind::Submit,
            "Transition.Action" => NodeKind::Action,
            _ => return None,
        })
    }

    pub fn discriminator(&self) -> &'static str {
        match self {
            NodeKind::Journey => "Structure.Journey",
            NodeKind::Step => "Structure.Step",
            NodeKind::Block => "Structure.Block",
            NodeKind::Reference => "Expression.Reference",
            NodeKind::Format => "Expression.Format",
            NodeKind::Next => "Expression.Next",
            NodeKind::Iterate => "Expression.Iterate",
            NodeKind::Validation => "Expression.Validation",
            NodeKind::Function(FunctionType::Condition) => "Function.Condition",
            NodeKind::Function(FunctionType::Transformer) => "Function.Transformer",
            NodeKind::Function(FunctionType::Effect) => "Function.Effect",
            NodeKind::Function(FunctionType::Generator) => "Function.Generator",
            NodeKind::And => "Predicate.And",
            NodeKind::Or => "Predicate.Or",
            NodeKind::Not => "Predicate.Not",
            NodeKind::Test => "Predicate.Test",
            NodeKind::Load => "Transition.Load",
            NodeKind::Access => "Transition.Access",
            NodeKind::Submit => "Transition.Submit",
            NodeKind::Action => "Transition.Action",
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, NodeKind::Journey | NodeKind::Step | NodeKind::Block)
    }

    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            NodeKind::Load | NodeKind::Access | NodeKind::Submit | NodeKind::Action
        )
    }

    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            NodeKind::And | NodeKind::Or | NodeKind::Not | NodeKind::Test
        )
    }

    /// Property names that hold transition lists on this structure kind.
    pub fn transition_properties(&self) -> &'static [&'static str] {
        match self {
            NodeKind::Journey => &["onLoad", "onAccess"],
            NodeKind::Step => &["onLoad", "onAccess", "onAction", "onSubmission"],
            _ => &[],
        }
    }
}

// =============================================================================
// PROPERTY VALUES
// =============================================================================

/// A transformed property: primitives pass through, arrays are mapped
/// element-wise, plain objects are descended, and objects with a known
/// `type` discriminator become child node links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Value(Value),
    Node(NodeId),
    List(Vec<PropValue>),
    Map(BTreeMap<String, PropValue>),
}

impl PropValue {
    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            PropValue::Node(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Value(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropValue]> {
        match self {
            PropValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Collect every node ID reachable from this property, depth-first.
    pub fn collect_node_ids(&self, out: &mut Vec<NodeId>) {
        match self {
            PropValue::Node(id) => out.push(id.clone()),
            PropValue::List(items) => {
                for item in items {
                    item.collect_node_ids(out);
                }
            }
            PropValue::Map(entries) => {
                for value in entries.values() {
                    value.collect_node_ids(out);
                }
            }
            PropValue::Value(_) => {}
        }
    }
}

// =============================================================================
// AST NODES
// =============================================================================

pub type PropMap = BTreeMap<String, PropValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub properties: PropMap,
    /// Back-pointer into the raw arena holding the declarative source.
    pub raw: RawId,
}

impl AstNode {
    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.properties.get(name)
    }

    pub fn node_prop(&self, name: &str) -> Option<&NodeId> {
        self.prop(name).and_then(PropValue::as_node)
    }

    pub fn string_prop(&self, name: &str) -> Option<&str> {
        self.prop(name).and_then(PropValue::as_str)
    }

    /// Node IDs in a list property, skipping non-node entries.
    pub fn node_list_prop(&self, name: &str) -> Vec<NodeId> {
        match self.prop(name) {
            Some(PropValue::List(items)) => items
                .iter()
                .filter_map(|item| item.as_node().cloned())
                .collect(),
            Some(PropValue::Node(id)) => vec![id.clone()],
            _ => vec![],
        }
    }

    /// A block with a `code` property captures user input.
    pub fn is_field_block(&self) -> bool {
        self.kind == NodeKind::Block && self.properties.contains_key("code")
    }

    /// Every child node ID linked from any property.
    pub fn child_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        for value in self.properties.values() {
            value.collect_node_ids(&mut ids);
        }
        ids
    }
}

// =============================================================================
// PSEUDO-NODES
// =============================================================================

/// External input sources, created implicitly from reference paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PseudoKind {
    Answer,
    /// Runtime-only: answers read from the current collection element.
    AnswerRemote,
    Data,
    Post,
    Query,
    Params,
}

impl PseudoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PseudoKind::Answer => "Answer",
            PseudoKind::AnswerRemote => "AnswerRemote",
            PseudoKind::Data => "Data",
            PseudoKind::Post => "Post",
            PseudoKind::Query => "Query",
            PseudoKind::Params => "Params",
        }
    }

    /// Reference path roots mapping onto this pseudo-node kind.
    pub fn from_path_root(root: &str) -> Option<PseudoKind> {
        Some(match root {
            "answers" => PseudoKind::Answer,
            "data" => PseudoKind::Data,
            "post" => PseudoKind::Post,
            "query" => PseudoKind::Query,
            "params" => PseudoKind::Params,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PseudoNode {
    pub id: NodeId,
    pub kind: PseudoKind,
    /// Base field code, data property, or parameter name.
    pub base: String,
    /// For `Post` pseudo-nodes: the field block carrying the matching code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_node: Option<NodeId>,
}

// =============================================================================
// REGISTERED NODE
// =============================================================================

/// A registry entry: either a compiled AST node or a pseudo-node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Ast(AstNode),
    Pseudo(PseudoNode),
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Node::Ast(node) => &node.id,
            Node::Pseudo(node) => &node.id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Node::Ast(node) => node.kind.discriminator(),
            Node::Pseudo(node) => node.kind.as_str(),
        }
    }

    pub fn as_ast(&self) -> Option<&AstNode> {
        match self {
            Node::Ast(node) => Some(node),
            Node::Pseudo(_) => None,
        }
    }

    pub fn as_pseudo(&self) -> Option<&PseudoNode> {
        match self {
            Node::Pseudo(node) => Some(node),
            Node::Ast(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminators_round_trip() {
        for disc in [
            "Structure.Journey",
            "Expression.Reference",
            "Function.Generator",
            "Predicate.Test",
            "Transition.Submit",
        ] {
            let kind = NodeKind::from_discriminator(disc).unwrap();
            assert_eq!(kind.discriminator(), disc);
        }
        assert!(NodeKind::from_discriminator("Structure.Page").is_none());
    }

    #[test]
    fn collect_node_ids_walks_nested_properties() {
        let mut generator = crate::id::IdGenerator::new();
        let a = generator.next(crate::id::IdCategory::CompileAst);
        let b = generator.next(crate::id::IdCategory::CompileAst);

        let mut map = BTreeMap::new();
        map.insert("inner".to_string(), PropValue::Node(b.clone()));
        let prop = PropValue::List(vec![
            PropValue::Node(a.clone()),
            PropValue::Value(Value::from(1)),
            PropValue::Map(map),
        ]);

        let mut ids = Vec::new();
        prop.collect_node_ids(&mut ids);
        assert_eq!(ids, vec![a, b]);
    }
}

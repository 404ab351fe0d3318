//! Unified engine error type used across compilation and evaluation.

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// Error taxonomy shared by every phase. Compile entry points aggregate
/// these into `Vec<EngineError>`; evaluation embeds them in thunk results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed declarative node (null, primitive, missing required property).
    Invalid,
    /// `type` discriminator not recognised.
    UnknownNodeType,
    /// Same ID registered twice in one registry layer.
    DuplicateId,
    /// No handler registered for a node ID.
    HandlerNotFound,
    /// Handler failed or returned an error.
    Evaluation,
    /// Invalidation loop exceeded the retry budget.
    MaxRetriesExceeded,
    /// Untrusted property key reached a pseudo-node handler.
    SecurityViolation,
    /// `@self` reference used outside a field block.
    SelfOutsideField,
    /// `@self` reference inside a field that has no `code`.
    MissingFieldCode,
    /// `@self` occurring inside the owning field's own `code` subtree.
    SelfInsideCode,
    /// Two steps compile to the same effective route.
    DuplicateRoute,
    /// Function name absent from the function registry.
    UnknownFunction,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Invalid => "Invalid",
            ErrorKind::UnknownNodeType => "UnknownNodeType",
            ErrorKind::DuplicateId => "DuplicateId",
            ErrorKind::HandlerNotFound => "HandlerNotFound",
            ErrorKind::Evaluation => "Evaluation",
            ErrorKind::MaxRetriesExceeded => "MaxRetriesExceeded",
            ErrorKind::SecurityViolation => "SecurityViolation",
            ErrorKind::SelfOutsideField => "SelfOutsideField",
            ErrorKind::MissingFieldCode => "MissingFieldCode",
            ErrorKind::SelfInsideCode => "SelfInsideCode",
            ErrorKind::DuplicateRoute => "DuplicateRoute",
            ErrorKind::UnknownFunction => "UnknownFunction",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Declarative breadcrumb, e.g. `steps[1].blocks[0].validate[2]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(id) = &self.node_id {
            write!(f, " (node '{}')", id)?;
        }
        if let Some(path) = &self.path {
            write!(f, " at {}", path)?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        EngineError {
            kind,
            message: message.into(),
            node_id: None,
            path: None,
            cause: None,
        }
    }

    pub fn with_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn invalid(message: impl Into<String>, path: impl Into<String>) -> Self {
        EngineError::new(ErrorKind::Invalid, message).with_path(path)
    }

    pub fn unknown_node_type(discriminator: &str, path: impl Into<String>) -> Self {
        EngineError::new(
            ErrorKind::UnknownNodeType,
            format!("Unknown node type '{}'", discriminator),
        )
        .with_path(path)
    }

    pub fn evaluation(message: impl Into<String>, node_id: NodeId) -> Self {
        EngineError::new(ErrorKind::Evaluation, message).with_node(node_id)
    }
}

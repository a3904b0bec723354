#![forbid(unsafe_code)]

//! Error type for document operations.

use thiserror::Error;

use crate::dom::NodeId;

/// Failures raised by [`Document`](crate::Document) operations and the
/// selector engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    /// The id does not belong to this document.
    #[error("node {0:?} does not exist in this document")]
    UnknownNode(NodeId),

    /// The node exists but is a text or document node.
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),

    /// The selector could not be parsed.
    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// The operation requires a different kind of element.
    #[error("cannot {operation} on <{found}>: expected {expected}")]
    WrongElementKind {
        operation: &'static str,
        expected: &'static str,
        found: String,
    },

    /// Tree mutation would create a cycle or reparent the document node.
    #[error("hierarchy request error: {0}")]
    Hierarchy(String),
}

pub type Result<T> = std::result::Result<T, DomError>;

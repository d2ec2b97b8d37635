use thiserror::Error;

use crate::graph::dag::Node;

/// Errors raised by network construction, inference, sampling and fitting.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("Node {0} is not part of the network")]
    UnknownNode(Node),

    #[error("Graph contains a cycle through nodes {0:?}")]
    Cycle(Vec<Node>),

    #[error("Arc set does not match the parent lists: {0}")]
    ArcMismatch(String),

    /// A CPT does not have one axis per parent followed by one axis for the node.
    #[error("Conditional for node {node} has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        node: Node,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Value {value} is not in the alphabet of node {node}")]
    UnknownValue { node: Node, value: i64 },

    #[error("Axis labels do not line up: {0}")]
    LabelMismatch(String),

    #[error("Node {0} appears more than once in a query")]
    DuplicateNode(Node),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Unsupported method '{0}'")]
    UnsupportedMethod(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Conditioning assignment {0:?} was not evaluated for this influence function")]
    UnseenAssignment(Vec<usize>),

    #[error("Propensity must be positive, got {0}")]
    ZeroPropensity(f64),

    #[error("Unsupported network file version {found} (newest supported is {supported})")]
    Version { found: u32, supported: u32 },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DagError>;

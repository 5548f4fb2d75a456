use crate::{NodeId, NodeState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure raised by a node handler.
///
/// These never escape the engine as errors: the scheduler turns them into a
/// terminal `fail` snapshot according to the node type's error policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Bypasses the `retry` strategy and fails the node immediately.
    #[error("Non-retryable failure: {0}")]
    NonRetryable(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::NonRetryable(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, NodeError::NonRetryable(_) | NodeError::Cancelled)
    }

    /// Stable name used when the error is serialized onto a node.
    pub fn name(&self) -> &'static str {
        match self {
            NodeError::MissingInput(_) => "MissingInput",
            NodeError::InvalidInputType { .. } => "InvalidInputType",
            NodeError::Configuration(_) => "ConfigurationError",
            NodeError::ExecutionFailed(_) => "HandlerError",
            NodeError::NonRetryable(_) => "NonRetryableError",
            NodeError::Timeout { .. } => "TimeoutError",
            NodeError::Cancelled => "CancelledError",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Node type not registered: {0}")]
    TypeNotFound(String),

    #[error(
        "Cycle detected: {}; cyclic dataflow is unsupported, decouple the loop through an external queue (push/pull) node",
        .path.join(" -> ")
    )]
    CycleDetected { path: Vec<NodeId> },

    #[error("Upstream node '{node_id}' is not terminal (state: {state}); incremental execution needs every unaffected node to have finished")]
    UpstreamIncomplete { node_id: NodeId, state: NodeState },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}

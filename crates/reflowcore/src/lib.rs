//! Core abstractions for the reflow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: values, node instances and their declared metadata,
//! workflows and edges, the handler contract, the error taxonomy, and the
//! event bus with its state projection.

mod error;
pub mod events;
mod handler;
mod meta;
mod node;
mod value;
mod workflow;

pub use error::{FlowError, NodeError, WorkflowError};
pub use events::*;
pub use handler::{
    handler_fn, AsyncHandler, AsyncNodeHandler, EmissionStream, FnHandler, NodeHandler,
    ResultProducer,
};
pub use meta::{
    AggregationMode, ErrorPolicy, ErrorStrategy, InputSpec, NodeMeta, OutputSpec, StateSpec,
};
pub use node::{new_node_id, NodeContext, NodeId, NodeInstance, NodeState, SerializedError};
pub use value::Value;
pub use workflow::{Edge, EdgeCondition, MergeMode, Position, Workflow, WorkflowId, WorkflowState};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

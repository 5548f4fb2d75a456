//! Workflow execution runtime
//!
//! This crate provides the execution engine: the node registry and compiler,
//! the stream network built from a workflow's edges, per-node dispatch with
//! error policies, the scheduler with its incremental planner, sub-workflow
//! nodes and the in-memory runtime façade.

mod combine;
mod compiler;
mod dataflow;
mod dispatch;
mod executor;
mod graph;
mod multicast;
mod network;
mod planner;
mod policy;
mod registry;
mod runtime;
mod scheduler;
mod subworkflow;

pub use combine::resolve_mode;
pub use compiler::{compile, compile_record, compile_workflow};
pub use dataflow::{EdgeValue, SourcePacket};
pub use graph::DependencyGraph;
pub use multicast::SharedStream;
pub use network::covering_combinations;
pub use policy::{decide, Decision};
pub use registry::{NodeMetadata, NodeRegistry, NodeType};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use scheduler::{Execution, ExecutionResult, Scheduler};
pub use subworkflow::{split_boundary_key, SubWorkflow};

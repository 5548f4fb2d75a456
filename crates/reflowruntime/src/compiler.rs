//! Turns raw node records into compiled instances carrying their type's
//! metadata snapshot.

use crate::registry::NodeRegistry;
use reflowcore::{FlowError, NodeInstance, NodeMeta, Workflow, WorkflowError};

/// Compile one node.
///
/// An already-compiled node is returned unchanged. Otherwise a fresh
/// instance of the registered type is built and the raw record's fields are
/// copied over, except channel outputs which keep their declared initial
/// value.
pub fn compile(registry: &NodeRegistry, raw: NodeInstance) -> Result<NodeInstance, WorkflowError> {
    if raw.is_compiled() {
        return Ok(raw);
    }
    let meta = registry
        .metadata(&raw.node_type)
        .ok_or_else(|| WorkflowError::TypeNotFound(raw.node_type.clone()))?;

    let mut node = NodeMeta::instantiate(&meta, raw.id.clone());
    node.position = raw.position;
    node.absorb_record(raw);
    Ok(node)
}

/// Compile a plain JSON node record
pub fn compile_record(
    registry: &NodeRegistry,
    record: serde_json::Value,
) -> Result<NodeInstance, FlowError> {
    let raw: NodeInstance = serde_json::from_value(record)?;
    Ok(compile(registry, raw)?)
}

/// Compile every node of a workflow in place
pub fn compile_workflow(registry: &NodeRegistry, workflow: &mut Workflow) -> Result<(), WorkflowError> {
    let nodes = std::mem::take(&mut workflow.nodes);
    workflow.nodes = nodes
        .into_iter()
        .map(|node| compile(registry, node))
        .collect::<Result<_, _>>()?;
    Ok(())
}

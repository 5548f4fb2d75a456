use crate::graph::DependencyGraph;
use reflowcore::{NodeId, NodeState, Workflow, WorkflowError};
use std::collections::HashSet;

/// How an incremental request will actually run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// First run: nothing to reuse, schedule everything
    Full,
    /// Re-execute `affected`, replay every other node
    Incremental { affected: HashSet<NodeId> },
}

/// Plan a re-run of `changed` and everything downstream of it.
///
/// Every unaffected node must already be terminal. A still-pending unaffected
/// node means the workflow never ran, and the plan falls back to a full run.
pub fn plan(workflow: &Workflow, graph: &DependencyGraph, changed: &str) -> Result<Plan, WorkflowError> {
    if !graph.contains(changed) {
        return Err(WorkflowError::NodeNotFound(changed.to_string()));
    }
    let affected = graph.downstream(changed);
    let unaffected = workflow.nodes.iter().filter(|n| !affected.contains(&n.id));

    let mut pending = false;
    for node in unaffected {
        match node.state {
            NodeState::Pending => pending = true,
            state if state.is_terminal() => {}
            state => {
                return Err(WorkflowError::UpstreamIncomplete {
                    node_id: node.id.clone(),
                    state,
                })
            }
        }
    }

    if pending {
        tracing::info!(
            "Workflow {} has pending upstream nodes, running {} as a full schedule",
            workflow.id,
            changed
        );
        return Ok(Plan::Full);
    }
    Ok(Plan::Incremental { affected })
}

//! Pure folds from execution output to workflow state.
//!
//! [`apply_snapshot`] and [`apply_event`] are the reducer used by the
//! scheduler and by external consumers; [`WorkflowProgress`] is a lighter
//! projection for progress reporting that needs no node data.

use super::{EventKind, FlowEvent};
use crate::{NodeId, NodeInstance, NodeState, Workflow, WorkflowState};
use std::collections::BTreeMap;

/// Fold a node snapshot into the workflow, replacing the node with the same
/// id and re-deriving the workflow state.
pub fn apply_snapshot(workflow: &mut Workflow, snapshot: NodeInstance) {
    match workflow.find_node_mut(&snapshot.id) {
        Some(node) => *node = snapshot,
        None => {
            tracing::debug!("Ignoring snapshot for unknown node {}", snapshot.id);
            return;
        }
    }
    workflow.state = workflow.derive_state();
}

/// Fold a bus event into the workflow.
///
/// Node events carry the wire-format record, so channel outputs are kept as
/// they are on the workflow's own instance.
pub fn apply_event(workflow: &mut Workflow, event: &FlowEvent) {
    match event.kind {
        EventKind::WorkflowStart => workflow.state = WorkflowState::Running,
        EventKind::WorkflowComplete => workflow.state = WorkflowState::Success,
        EventKind::WorkflowFail => workflow.state = WorkflowState::Fail,
        EventKind::NodeStart
        | EventKind::NodeEmit
        | EventKind::NodeSuccess
        | EventKind::NodeFail
        | EventKind::NodeUpdated => {
            let Some(payload) = &event.payload else {
                return;
            };
            let Ok(record) = serde_json::from_value::<NodeInstance>(payload.clone()) else {
                return;
            };
            if let Some(node) = workflow.find_node_mut(&record.id) {
                node.absorb_record(record);
                workflow.state = workflow.derive_state();
            }
        }
        EventKind::EdgeAdded => {
            if let Some(edge) = event
                .payload
                .as_ref()
                .and_then(|p| serde_json::from_value(p.clone()).ok())
            {
                workflow.edges.push(edge);
            }
        }
        EventKind::EdgeRemoved => {
            if let Some(edge) = event
                .payload
                .as_ref()
                .and_then(|p| serde_json::from_value::<crate::Edge>(p.clone()).ok())
            {
                workflow.edges.retain(|e| *e != edge);
            }
        }
    }
}

/// Per-node state, progress percent and failed-node list for one workflow
#[derive(Debug, Clone)]
pub struct WorkflowProgress {
    workflow_id: String,
    nodes: BTreeMap<NodeId, NodeState>,
    failed: Vec<NodeId>,
    state: WorkflowState,
}

impl WorkflowProgress {
    pub fn new(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            nodes: workflow
                .nodes
                .iter()
                .map(|n| (n.id.clone(), n.state))
                .collect(),
            failed: Vec::new(),
            state: workflow.state,
        }
    }

    pub fn apply(&mut self, event: &FlowEvent) {
        if event.workflow_id.as_deref() != Some(self.workflow_id.as_str()) {
            return;
        }
        let node_state = match event.kind {
            EventKind::WorkflowStart => {
                self.state = WorkflowState::Running;
                return;
            }
            EventKind::WorkflowComplete => {
                self.state = WorkflowState::Success;
                return;
            }
            EventKind::WorkflowFail => {
                self.state = WorkflowState::Fail;
                return;
            }
            EventKind::NodeStart => NodeState::Running,
            EventKind::NodeEmit => NodeState::Emitting,
            EventKind::NodeSuccess => NodeState::Success,
            EventKind::NodeFail => NodeState::Fail,
            EventKind::NodeUpdated | EventKind::EdgeAdded | EventKind::EdgeRemoved => return,
        };
        let Some(node_id) = &event.node_id else {
            return;
        };
        self.nodes.insert(node_id.clone(), node_state);
        if node_state == NodeState::Fail && !self.failed.contains(node_id) {
            self.failed.push(node_id.clone());
        }
    }

    /// Share of nodes that reached a terminal state, 0-100
    pub fn percent(&self) -> f64 {
        if self.nodes.is_empty() {
            return 100.0;
        }
        let done = self.nodes.values().filter(|s| s.is_terminal()).count();
        done as f64 * 100.0 / self.nodes.len() as f64
    }

    pub fn failed_nodes(&self) -> &[NodeId] {
        &self.failed
    }

    pub fn node_state(&self, id: &str) -> Option<NodeState> {
        self.nodes.get(id).copied()
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }
}

//! Workflow-typed nodes.
//!
//! A sub-workflow node exposes `"<innerNodeId>.<property>"` keys: the
//! declared inputs of the inner entry nodes as its inputs, and every inner
//! output not consumed by an inner edge as its outputs.

use crate::registry::{NodeRegistry, NodeType};
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use reflowcore::{
    AsyncNodeHandler, EventBus, InputSpec, NodeContext, NodeError, NodeInstance, NodeMeta, OutputSpec,
    Workflow, WorkflowError, WorkflowState,
};
use std::sync::Arc;

pub struct SubWorkflow {
    workflow: Workflow,
    registry: Arc<NodeRegistry>,
    event_buffer: usize,
}

impl SubWorkflow {
    pub fn new(workflow: Workflow, registry: Arc<NodeRegistry>) -> Self {
        Self {
            workflow,
            registry,
            event_buffer: 256,
        }
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    /// Boundary input keys: declared inputs of inner entry nodes
    pub fn input_keys(&self) -> Result<Vec<String>, WorkflowError> {
        let mut keys = Vec::new();
        for id in self.workflow.entry_nodes() {
            let meta = self.inner_meta(id)?;
            for input in meta.effective_inputs() {
                keys.push(format!("{}.{}", id, input.property));
            }
        }
        Ok(keys)
    }

    /// Boundary output keys: inner outputs no inner edge consumes
    pub fn output_keys(&self) -> Result<Vec<String>, WorkflowError> {
        let mut keys = Vec::new();
        for node in &self.workflow.nodes {
            let meta = self.inner_meta(&node.id)?;
            for output in meta.effective_outputs().into_iter().filter(|o| !o.channel) {
                let consumed = self.workflow.outgoing(&node.id).any(|(_, e)| {
                    e.from_property
                        .as_deref()
                        .map_or(true, |p| p == output.property)
                });
                if !consumed {
                    keys.push(format!("{}.{}", node.id, output.property));
                }
            }
        }
        Ok(keys)
    }

    fn inner_meta(&self, id: &str) -> Result<Arc<NodeMeta>, WorkflowError> {
        let node = self
            .workflow
            .find_node(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        self.registry
            .metadata(&node.node_type)
            .ok_or_else(|| WorkflowError::TypeNotFound(node.node_type.clone()))
    }

    /// Node type named `name` running this workflow
    pub fn node_type(self, name: impl Into<String>) -> Result<NodeType, WorkflowError> {
        let inputs = self.input_keys()?;
        let outputs = self.output_keys()?;

        let mut node_type = NodeType::new(name)
            .description(format!("Runs workflow {}", self.workflow.name))
            .category("workflow");
        for key in &inputs {
            node_type = node_type.input(InputSpec::new(key.clone()));
        }
        for key in &outputs {
            node_type = node_type.output(OutputSpec::new(key.clone()));
        }

        Ok(node_type.async_handler(SubWorkflowHandler {
            sub: self,
            inputs,
            outputs,
        }))
    }
}

/// Split a boundary key on the longest inner node id it starts with.
///
/// Node ids may themselves contain dots, so the key is never split blindly.
pub fn split_boundary_key<'k>(workflow: &Workflow, key: &'k str) -> Option<(&'k str, &'k str)> {
    workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| {
            key.len() > id.len() + 1
                && key.starts_with(id)
                && key.as_bytes()[id.len()] == b'.'
        })
        .max_by_key(|id| id.len())
        .map(|id| (&key[..id.len()], &key[id.len() + 1..]))
}

struct SubWorkflowHandler {
    sub: SubWorkflow,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

#[async_trait]
impl AsyncNodeHandler for SubWorkflowHandler {
    async fn execute(&self, mut node: NodeInstance, ctx: NodeContext) -> Result<NodeInstance, NodeError> {
        let mut inner = self.sub.workflow.clone();
        for key in &self.inputs {
            let Some(value) = node.get(key).filter(|v| !v.is_null()).cloned() else {
                continue;
            };
            if let Some((id, property)) = split_boundary_key(&inner, key) {
                if let Some(target) = inner.find_node_mut(id) {
                    target.set(property, value);
                }
            }
        }

        let scheduler = Scheduler::new(
            Arc::clone(&self.sub.registry),
            Arc::new(EventBus::new(self.sub.event_buffer)),
        );
        let execution = scheduler
            .schedule(&inner)
            .map_err(|e| NodeError::Configuration(e.to_string()))?;
        let inner_token = execution.cancellation_token();

        ctx.events.info(format!("Running sub-workflow {}", inner.id));
        let result = tokio::select! {
            result = execution.run() => result,
            _ = ctx.cancellation.cancelled() => {
                inner_token.cancel();
                return Err(NodeError::Cancelled);
            }
        };

        if result.state() == WorkflowState::Fail {
            return Err(NodeError::failed(format!(
                "sub-workflow {} failed at nodes {:?}",
                inner.id,
                result.failed_nodes()
            )));
        }

        for key in &self.outputs {
            if let Some((id, property)) = split_boundary_key(&result.workflow, key) {
                if let Some(value) = result.node(id).and_then(|n| n.get(property)).cloned() {
                    node.set(key, value);
                }
            }
        }
        Ok(node)
    }
}

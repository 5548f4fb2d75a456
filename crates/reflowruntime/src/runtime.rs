use crate::{ExecutionResult, NodeRegistry, Scheduler, SubWorkflow};
use reflowcore::{
    Edge, EventBus, EventKind, EventSubscription, FlowError, FlowEvent, NodeInstance, Workflow,
    WorkflowError, WorkflowId,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Main runtime for executing workflows
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    scheduler: Scheduler,
    event_bus: Arc<EventBus>,
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        Self::with_registry(registry, config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let scheduler = Scheduler::new(Arc::clone(&registry), Arc::clone(&event_bus));

        Self {
            registry,
            scheduler,
            event_bus,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Get access to the node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register a workflow
    pub async fn register_workflow(&self, workflow: Workflow) -> WorkflowId {
        let id = workflow.id.clone();
        let mut workflows = self.workflows.write().await;
        workflows.insert(id.clone(), workflow);
        id
    }

    /// Current state of a registered workflow
    pub async fn workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    async fn registered(&self, workflow_id: &str) -> Result<Workflow, FlowError> {
        self.workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()).into())
    }

    async fn store(&self, workflow: Workflow) {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow);
    }

    /// Execute a registered workflow and keep its final state for later
    /// incremental runs
    pub async fn execute_workflow(&self, workflow_id: &str) -> Result<ExecutionResult, FlowError> {
        let workflow = self.registered(workflow_id).await?;
        let result = self.execute(&workflow).await?;
        self.store(result.workflow.clone()).await;
        Ok(result)
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(&self, workflow: &Workflow) -> Result<ExecutionResult, FlowError> {
        let execution = self.scheduler.schedule(workflow)?;
        Ok(execution.run().await)
    }

    /// Re-run `node_id` and everything downstream of it
    pub async fn fine_tune_workflow(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> Result<ExecutionResult, FlowError> {
        let workflow = self.registered(workflow_id).await?;
        let execution = self.scheduler.fine_tune(&workflow, node_id)?;
        let result = execution.run().await;
        self.store(result.workflow.clone()).await;
        Ok(result)
    }

    /// Replace a node of a registered workflow
    pub async fn update_node(&self, workflow_id: &str, node: NodeInstance) -> Result<(), FlowError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        let event = FlowEvent::node(EventKind::NodeUpdated, workflow_id, &node);
        let node_id = node.id.clone();
        workflow
            .replace_node(node)
            .ok_or(WorkflowError::NodeNotFound(node_id))?;
        self.event_bus.emit(event);
        Ok(())
    }

    pub async fn add_edge(&self, workflow_id: &str, edge: Edge) -> Result<(), FlowError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        for end in [&edge.from, &edge.to] {
            if !workflow.contains_node(end) {
                return Err(WorkflowError::InvalidConnection(format!(
                    "edge {} -> {} references missing node {}",
                    edge.from, edge.to, end
                ))
                .into());
            }
        }
        self.event_bus
            .emit(FlowEvent::edge(EventKind::EdgeAdded, workflow_id, &edge));
        workflow.add_edge(edge);
        Ok(())
    }

    /// Remove every edge between two nodes
    pub async fn remove_edge(&self, workflow_id: &str, from: &str, to: &str) -> Result<Vec<Edge>, FlowError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        let removed = workflow.remove_edges(from, to);
        for edge in &removed {
            self.event_bus
                .emit(FlowEvent::edge(EventKind::EdgeRemoved, workflow_id, edge));
        }
        Ok(removed)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> EventSubscription {
        self.event_bus.subscribe_all()
    }

    pub fn subscribe_to(&self, kinds: &[EventKind]) -> EventSubscription {
        self.event_bus.subscribe_to(kinds)
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Event channel capacity of each sub-workflow run
    pub sub_workflow_event_buffer: usize,
}

impl RuntimeConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Wrap `workflow` as a sub-workflow node sized by this configuration
    pub fn sub_workflow(&self, workflow: Workflow, registry: Arc<NodeRegistry>) -> SubWorkflow {
        SubWorkflow::new(workflow, registry).with_event_buffer(self.sub_workflow_event_buffer)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1024,
            sub_workflow_event_buffer: 256,
        }
    }
}

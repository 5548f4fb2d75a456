use crate::{Edge, NodeId, NodeInstance, NodeState, WorkflowId};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle transitions published on the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    WorkflowStart,
    WorkflowComplete,
    WorkflowFail,
    NodeStart,
    NodeEmit,
    NodeSuccess,
    NodeFail,
    NodeUpdated,
    EdgeAdded,
    EdgeRemoved,
}

impl EventKind {
    /// Event published when a node snapshot in `state` is observed
    pub fn for_node_state(state: NodeState) -> Option<Self> {
        match state {
            NodeState::Pending => None,
            NodeState::Running => Some(EventKind::NodeStart),
            NodeState::Emitting => Some(EventKind::NodeEmit),
            NodeState::Success => Some(EventKind::NodeSuccess),
            NodeState::Fail => Some(EventKind::NodeFail),
        }
    }

    pub fn is_workflow_terminal(self) -> bool {
        matches!(self, EventKind::WorkflowComplete | EventKind::WorkflowFail)
    }
}

/// One entry on the event channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl FlowEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            workflow_id: None,
            node_id: None,
            payload: None,
            timestamp: Utc::now(),
        }
    }

    pub fn workflow(kind: EventKind, workflow_id: impl Into<WorkflowId>) -> Self {
        Self {
            workflow_id: Some(workflow_id.into()),
            ..Self::new(kind)
        }
    }

    /// Node event carrying the node's wire-format record as payload
    pub fn node(kind: EventKind, workflow_id: impl Into<WorkflowId>, node: &NodeInstance) -> Self {
        Self {
            node_id: Some(node.id.clone()),
            payload: Some(node.to_record()),
            ..Self::workflow(kind, workflow_id)
        }
    }

    pub fn edge(kind: EventKind, workflow_id: impl Into<WorkflowId>, edge: &Edge) -> Self {
        Self {
            payload: serde_json::to_value(edge).ok(),
            ..Self::workflow(kind, workflow_id)
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Event emitter for handlers to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    workflow_id: WorkflowId,
    execution_id: ExecutionId,
    node_id: NodeId,
    sender: broadcast::Sender<FlowEvent>,
}

impl EventEmitter {
    pub fn new(
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        node_id: NodeId,
        sender: broadcast::Sender<FlowEvent>,
    ) -> Self {
        Self {
            workflow_id,
            execution_id,
            node_id,
            sender,
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn update(&self, payload: serde_json::Value) {
        let _ = self.sender.send(FlowEvent {
            node_id: Some(self.node_id.clone()),
            payload: Some(payload),
            ..FlowEvent::workflow(EventKind::NodeUpdated, self.workflow_id.clone())
        });
    }

    /// Emit info message
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(node_id = %self.node_id, "{}", message);
        self.update(serde_json::json!({ "level": "info", "message": message }));
    }

    /// Emit warning message
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(node_id = %self.node_id, "{}", message);
        self.update(serde_json::json!({ "level": "warn", "message": message }));
    }

    /// Emit progress update
    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.update(serde_json::json!({ "progress": percent, "message": message }));
    }
}

/// Append-only, in-process event channel
pub struct EventBus {
    sender: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to a subset of event kinds
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            kinds: Some(kinds.iter().copied().collect()),
        }
    }

    pub fn subscribe_all(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            kinds: None,
        }
    }

    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(
        &self,
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        node_id: NodeId,
    ) -> EventEmitter {
        EventEmitter::new(workflow_id, execution_id, node_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Filtered view of the event channel
pub struct EventSubscription {
    receiver: broadcast::Receiver<FlowEvent>,
    kinds: Option<HashSet<EventKind>>,
}

impl EventSubscription {
    /// Next matching event; `None` once the bus is gone.
    ///
    /// Events dropped because this subscriber lagged behind are skipped.
    pub async fn recv(&mut self) -> Option<FlowEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting
    pub fn try_recv(&mut self) -> Option<FlowEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, event: &FlowEvent) -> bool {
        self.kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&event.kind))
    }

    pub fn into_stream(self) -> BoxStream<'static, FlowEvent> {
        stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
        .boxed()
    }
}

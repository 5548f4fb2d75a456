use crate::events::{EventEmitter, ExecutionId};
use crate::meta::NodeMeta;
use crate::workflow::{Position, WorkflowId};
use crate::{NodeError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type NodeId = String;

/// Generate a fresh random node id
pub fn new_node_id() -> NodeId {
    Uuid::new_v4().to_string()
}

/// Per-node lifecycle: `pending → running → (emitting)* → success | fail`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Pending,
    Running,
    Emitting,
    Success,
    Fail,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Success | NodeState::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Emitting => "emitting",
            NodeState::Success => "success",
            NodeState::Fail => "fail",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler failure as stored on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&NodeError> for SerializedError {
    fn from(error: &NodeError) -> Self {
        Self {
            name: error.name().to_string(),
            message: error.to_string(),
            stack: Some(format!("{error:?}")),
        }
    }
}

/// A node in a workflow: identity, lifecycle counters and its declared
/// input/output/state fields.
///
/// Serializes to a flat record. Channel outputs live outside `fields` and are
/// never serialized; the compiler rebuilds them from the type's declared
/// initial value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub emit_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializedError>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
    #[serde(skip)]
    channels: BTreeMap<String, Value>,
    #[serde(skip)]
    meta: Option<Arc<NodeMeta>>,
}

impl NodeInstance {
    /// Raw, uncompiled node
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            state: NodeState::Pending,
            count: 0,
            emit_count: 0,
            error: None,
            skipped: false,
            position: None,
            fields: BTreeMap::new(),
            channels: BTreeMap::new(),
            meta: None,
        }
    }

    pub(crate) fn from_parts(
        id: NodeId,
        node_type: String,
        fields: BTreeMap<String, Value>,
        meta: Arc<NodeMeta>,
    ) -> Self {
        let mut node = Self::new(id, node_type);
        node.fields = fields;
        node.channels = meta.fresh_channels();
        node.meta = Some(meta);
        node
    }

    pub fn with_field(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.set(property, value);
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn meta(&self) -> Option<&Arc<NodeMeta>> {
        self.meta.as_ref()
    }

    pub fn is_compiled(&self) -> bool {
        self.meta.is_some()
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn channels(&self) -> &BTreeMap<String, Value> {
        &self.channels
    }

    fn is_channel(&self, property: &str) -> bool {
        self.meta.as_ref().is_some_and(|m| m.is_channel(property))
    }

    fn literal(&self, key: &str) -> Option<&Value> {
        if self.is_channel(key) {
            self.channels.get(key)
        } else {
            self.fields.get(key)
        }
    }

    /// Read a property.
    ///
    /// A literal key wins (sub-workflow boundary keys such as `inner.result`
    /// are stored verbatim); otherwise the longest literal prefix is resolved
    /// and the remainder walked as a nested path.
    pub fn get(&self, property: &str) -> Option<&Value> {
        if let Some(value) = self.literal(property) {
            return Some(value);
        }
        property.rmatch_indices('.').find_map(|(idx, _)| {
            self.literal(&property[..idx])
                .and_then(|base| base.get_path(&property[idx + 1..]))
        })
    }

    /// Present and not null
    pub fn is_set(&self, property: &str) -> bool {
        self.get(property).is_some_and(|v| !v.is_null())
    }

    /// Write a property, honouring channel outputs, literal keys declared by
    /// the type, and nested paths into existing fields.
    pub fn set(&mut self, property: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.is_channel(property) {
            self.channels.insert(property.to_string(), value);
            return;
        }
        let declared = self.meta.as_ref().is_some_and(|m| m.declares(property));
        if declared || !property.contains('.') || self.fields.contains_key(property) {
            self.fields.insert(property.to_string(), value);
            return;
        }
        let prefix = property
            .rmatch_indices('.')
            .map(|(idx, _)| idx)
            .find(|idx| self.fields.contains_key(&property[..*idx]));
        match prefix {
            Some(idx) => {
                if let Some(base) = self.fields.get_mut(&property[..idx]) {
                    base.set_path(&property[idx + 1..], value);
                }
            }
            None => {
                let (head, rest) = property.split_once('.').unwrap_or((property, ""));
                self.fields
                    .entry(head.to_string())
                    .or_default()
                    .set_path(rest, value);
            }
        }
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_input(name)?;
        value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: type_name(value).to_string(),
        })
    }

    /// Get input with default
    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.get(name)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or(default)
    }

    /// Declared outputs (channels included) as one object.
    ///
    /// An uncompiled node has no declared outputs and exposes all its fields.
    pub fn outputs(&self) -> Value {
        match &self.meta {
            Some(meta) => Value::Object(
                meta.effective_outputs()
                    .into_iter()
                    .filter_map(|o| {
                        self.literal(&o.property)
                            .map(|v| (o.property.clone(), v.clone()))
                    })
                    .collect(),
            ),
            None => Value::Object(self.fields.clone()),
        }
    }

    /// This snapshot carries data for downstream edges
    pub fn has_data(&self) -> bool {
        matches!(self.state, NodeState::Emitting | NodeState::Success)
            && !self.skipped
            && self.emit_count > 0
    }

    /// Structural copy for a new execution: fields are cloned, channel outputs
    /// are rebuilt from their declared initial values.
    pub fn fresh_copy(&self) -> Self {
        let mut copy = self.clone();
        if let Some(meta) = &self.meta {
            copy.channels = meta.fresh_channels();
        }
        copy
    }

    /// Return to `pending` for another run, keeping the completed-execution
    /// counter. Aggregated (multi/buffer) inputs are emptied when
    /// `clear_aggregated` is set.
    pub fn reset_for_rerun(&mut self, clear_aggregated: bool) {
        self.state = NodeState::Pending;
        self.emit_count = 0;
        self.error = None;
        self.skipped = false;
        let Some(meta) = self.meta.clone() else {
            return;
        };
        self.channels = meta.fresh_channels();
        if clear_aggregated {
            for input in meta.effective_inputs() {
                if input.aggregation.is_aggregated() {
                    self.fields
                        .insert(input.property.clone(), Value::Array(Vec::new()));
                }
            }
        }
    }

    /// Reset every transient field before a full run
    pub fn reset_transient(&mut self, clear_aggregated: bool) {
        self.reset_for_rerun(clear_aggregated);
        self.count = 0;
    }

    /// Wire-format record (channel outputs excluded)
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Copy lifecycle fields and field values from another snapshot of the
    /// same node, keeping this instance's metadata and channels.
    pub fn absorb_record(&mut self, record: NodeInstance) {
        self.state = record.state;
        self.count = record.count;
        self.emit_count = record.emit_count;
        self.error = record.error;
        self.skipped = record.skipped;
        for (key, value) in record.fields {
            if !self.is_channel(&key) {
                self.fields.insert(key, value);
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Execution context passed to each handler
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    pub workflow_id: WorkflowId,

    pub execution_id: ExecutionId,

    /// Zero-based attempt number (greater than zero on retries)
    pub attempt: u32,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cooperative cancellation; handlers are expected to honour it
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(events: EventEmitter) -> Self {
        Self {
            node_id: events.node_id().clone(),
            workflow_id: events.workflow_id().clone(),
            execution_id: events.execution_id(),
            attempt: 0,
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

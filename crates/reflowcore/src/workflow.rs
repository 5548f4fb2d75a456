use crate::{NodeId, NodeInstance, NodeState, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkflowId = String;

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeInstance>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Hint for binding external input; not a gate on execution.
    #[serde(default)]
    pub entry_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub end_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub state: WorkflowState,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            entry_node_ids: Vec::new(),
            end_node_ids: Vec::new(),
            state: WorkflowState::Pending,
        }
    }

    pub fn with_id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn add_node(&mut self, node: NodeInstance) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Add a data edge from `from.from_property` to `to.to_property`
    pub fn connect(
        &mut self,
        from: impl Into<NodeId>,
        from_property: impl Into<String>,
        to: impl Into<NodeId>,
        to_property: impl Into<String>,
    ) -> &mut Edge {
        self.add_edge(Edge::data(from, from_property, to, to_property))
    }

    pub fn add_edge(&mut self, edge: Edge) -> &mut Edge {
        self.edges.push(edge);
        let last = self.edges.len() - 1;
        &mut self.edges[last]
    }

    /// Remove every edge between `from` and `to`, returning them
    pub fn remove_edges(&mut self, from: &str, to: &str) -> Vec<Edge> {
        let (removed, kept): (Vec<Edge>, Vec<Edge>) = std::mem::take(&mut self.edges)
            .into_iter()
            .partition(|e| e.from == from && e.to == to);
        self.edges = kept;
        removed
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut NodeInstance> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.find_node(id).is_some()
    }

    /// Replace the node with the same id, returning the previous instance
    pub fn replace_node(&mut self, node: NodeInstance) -> Option<NodeInstance> {
        let slot = self.find_node_mut(&node.id)?;
        Some(std::mem::replace(slot, node))
    }

    /// Incoming edges of `id` with their declaration index
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = (usize, &'a Edge)> + 'a {
        self.edges.iter().enumerate().filter(move |(_, e)| e.to == id)
    }

    /// Outgoing edges of `id` with their declaration index
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = (usize, &'a Edge)> + 'a {
        self.edges.iter().enumerate().filter(move |(_, e)| e.from == id)
    }

    /// A node without incoming edges is an entry node, listed or not
    pub fn is_entry(&self, id: &str) -> bool {
        self.incoming(id).next().is_none()
    }

    pub fn entry_nodes(&self) -> Vec<&NodeId> {
        self.nodes
            .iter()
            .map(|n| &n.id)
            .filter(|id| self.is_entry(id))
            .collect()
    }

    /// Explicit end nodes, or every node without outgoing edges
    pub fn end_nodes(&self) -> Vec<&NodeId> {
        if !self.end_node_ids.is_empty() {
            return self.end_node_ids.iter().collect();
        }
        self.nodes
            .iter()
            .map(|n| &n.id)
            .filter(|id| self.outgoing(id).next().is_none())
            .collect()
    }

    /// Workflow state as a function of its nodes
    pub fn derive_state(&self) -> WorkflowState {
        WorkflowState::derive(self.nodes.iter().map(|n| n.state))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    #[default]
    Pending,
    Running,
    Success,
    Fail,
}

impl WorkflowState {
    /// `fail` if any node failed, `running` while any node is in flight,
    /// `pending` if nothing has run yet, `success` otherwise.
    pub fn derive(states: impl IntoIterator<Item = NodeState>) -> Self {
        let mut any_terminal = false;
        let mut in_flight = false;
        for state in states {
            match state {
                NodeState::Fail => return WorkflowState::Fail,
                NodeState::Running | NodeState::Emitting => in_flight = true,
                NodeState::Success => any_terminal = true,
                NodeState::Pending => {}
            }
        }
        if in_flight {
            WorkflowState::Running
        } else if any_terminal {
            WorkflowState::Success
        } else {
            WorkflowState::Pending
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Success | WorkflowState::Fail)
    }
}

/// Stream-combination strategy for a node with several upstream sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeMode {
    Merge,
    Zip,
    CombineLatest,
    WithLatestFrom,
}

/// Control condition: the edge fires only when the source's `property`
/// equals `value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCondition {
    pub property: String,
    pub value: Value,
}

/// Connection between nodes
///
/// Carries a data mapping, a control condition, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_property: Option<String>,
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MergeMode>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_primary: bool,
}

impl Edge {
    /// Control edge without data mapping
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            from_property: None,
            to: to.into(),
            to_property: None,
            weight: None,
            condition: None,
            mode: None,
            is_primary: false,
        }
    }

    pub fn data(
        from: impl Into<NodeId>,
        from_property: impl Into<String>,
        to: impl Into<NodeId>,
        to_property: impl Into<String>,
    ) -> Self {
        Self {
            from_property: Some(from_property.into()),
            to_property: Some(to_property.into()),
            ..Self::new(from, to)
        }
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn when(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition = Some(EdgeCondition {
            property: property.into(),
            value: value.into(),
        });
        self
    }

    /// Target property; defaults to the source property
    pub fn target_property(&self) -> Option<&str> {
        self.to_property
            .as_deref()
            .or(self.from_property.as_deref())
    }

    pub fn sort_weight(&self) -> i64 {
        self.weight.unwrap_or(0)
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_without_incoming_edges_are_entries() {
        let mut wf = Workflow::new("t");
        wf.add_node(NodeInstance::new("a", "x"));
        wf.add_node(NodeInstance::new("b", "x"));
        wf.add_node(NodeInstance::new("c", "x"));
        wf.connect("a", "out", "c", "in");

        let entries: Vec<_> = wf.entry_nodes().into_iter().cloned().collect();
        assert_eq!(entries, vec!["a".to_string(), "b".to_string()]);
        let ends: Vec<_> = wf.end_nodes().into_iter().cloned().collect();
        assert_eq!(ends, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn derived_state_prefers_failure() {
        use NodeState::*;
        assert_eq!(WorkflowState::derive([Success, Fail, Running]), WorkflowState::Fail);
        assert_eq!(WorkflowState::derive([Success, Running]), WorkflowState::Running);
        assert_eq!(WorkflowState::derive([Success, Pending]), WorkflowState::Success);
        assert_eq!(WorkflowState::derive([Pending, Pending]), WorkflowState::Pending);
    }

    #[test]
    fn edges_deserialize_from_camel_case() {
        let edge: Edge = serde_json::from_str(
            r#"{"from":"a","fromProperty":"out","to":"b","mode":"WITH_LATEST_FROM","isPrimary":true}"#,
        )
        .unwrap();

        assert_eq!(edge.mode, Some(MergeMode::WithLatestFrom));
        assert!(edge.is_primary);
        assert_eq!(edge.target_property(), Some("out"));
    }
}

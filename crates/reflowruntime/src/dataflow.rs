//! Moving values along edges: extraction from a source snapshot and
//! assignment onto a target instance according to each input's
//! aggregation mode.

use reflowcore::{AggregationMode, Edge, NodeId, NodeInstance, NodeMeta, Value};
use std::collections::BTreeMap;

/// One edge's contribution to a trigger
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeValue {
    pub edge_index: usize,
    pub weight: i64,
    /// `None` for a pure trigger edge
    pub to_property: Option<String>,
    pub value: Value,
}

/// Everything one source snapshot delivers to the target node
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePacket {
    pub source: NodeId,
    pub values: Vec<EdgeValue>,
}

/// The incoming edges of a target node that share one source
#[derive(Debug, Clone)]
pub struct SourceEdges {
    pub source: NodeId,
    pub edges: Vec<(usize, Edge)>,
}

impl SourceEdges {
    /// Group incoming edges by source, in order of first appearance
    pub fn partition<'a>(incoming: impl IntoIterator<Item = (usize, &'a Edge)>) -> Vec<Self> {
        let mut groups: Vec<SourceEdges> = Vec::new();
        for (idx, edge) in incoming {
            match groups.iter_mut().find(|g| g.source == edge.from) {
                Some(group) => group.edges.push((idx, edge.clone())),
                None => groups.push(SourceEdges {
                    source: edge.from.clone(),
                    edges: vec![(idx, edge.clone())],
                }),
            }
        }
        groups
    }

    pub fn target_properties(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().filter_map(|(_, e)| e.target_property())
    }

    /// Values this snapshot delivers, or `None` when every edge is
    /// suppressed by its condition or by an unset router output.
    pub fn extract(&self, snapshot: &NodeInstance) -> Option<SourcePacket> {
        let values: Vec<EdgeValue> = self
            .edges
            .iter()
            .filter_map(|(idx, edge)| extract_edge(*idx, edge, snapshot))
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(SourcePacket {
            source: self.source.clone(),
            values,
        })
    }
}

fn extract_edge(edge_index: usize, edge: &Edge, snapshot: &NodeInstance) -> Option<EdgeValue> {
    if let Some(condition) = &edge.condition {
        if snapshot.get(&condition.property) != Some(&condition.value) {
            return None;
        }
    }

    let value = match edge.from_property.as_deref() {
        Some(property) => {
            let router = snapshot.meta().is_some_and(|m| m.is_router(property));
            if router && !snapshot.is_set(property) {
                return None;
            }
            snapshot.get(property).cloned().unwrap_or_default()
        }
        None => snapshot.outputs(),
    };

    Some(EdgeValue {
        edge_index,
        weight: edge.sort_weight(),
        to_property: edge.target_property().map(str::to_string),
        value,
    })
}

/// Fold every emission of a completed buffered source into one packet.
///
/// Edges feeding a buffer-mode input deliver the array of all their values;
/// other edges of the same source deliver their latest value.
pub fn coalesce(meta: Option<&NodeMeta>, packets: Vec<SourcePacket>) -> Option<SourcePacket> {
    let source = packets.first()?.source.clone();
    let mut merged: BTreeMap<usize, EdgeValue> = BTreeMap::new();

    for value in packets.into_iter().flat_map(|p| p.values) {
        let buffered = value
            .to_property
            .as_deref()
            .is_some_and(|p| aggregation(meta, p).is_buffer());
        match merged.get_mut(&value.edge_index) {
            Some(existing) if buffered => {
                if let Value::Array(items) = &mut existing.value {
                    items.push(value.value);
                }
            }
            Some(existing) => *existing = value,
            None if buffered => {
                merged.insert(
                    value.edge_index,
                    EdgeValue {
                        value: Value::Array(vec![value.value]),
                        ..value
                    },
                );
            }
            None => {
                merged.insert(value.edge_index, value);
            }
        }
    }

    Some(SourcePacket {
        source,
        values: merged.into_values().collect(),
    })
}

fn aggregation(meta: Option<&NodeMeta>, property: &str) -> AggregationMode {
    meta.map(|m| m.aggregation(property)).unwrap_or_default()
}

/// Assign a combined trigger onto a fresh node instance.
///
/// Values are applied in `(weight, declaration)` order. Single and buffer
/// inputs take the last value; multi inputs get one element per edge;
/// multi-buffer inputs get every buffered emission flattened.
pub fn assign(node: &mut NodeInstance, packets: &[SourcePacket]) {
    let mut values: Vec<&EdgeValue> = packets.iter().flat_map(|p| &p.values).collect();
    values.sort_by_key(|v| (v.weight, v.edge_index));

    let meta = node.meta().cloned();
    let mut accumulated: BTreeMap<String, Vec<Value>> = BTreeMap::new();

    for value in values {
        let Some(property) = value.to_property.as_deref() else {
            continue;
        };
        match aggregation(meta.as_deref(), property) {
            AggregationMode::Single | AggregationMode::Buffer => {
                node.set(property, value.value.clone());
            }
            AggregationMode::Multi => {
                accumulated
                    .entry(property.to_string())
                    .or_default()
                    .push(value.value.clone());
            }
            AggregationMode::MultiBuffer => {
                let slot = accumulated.entry(property.to_string()).or_default();
                match &value.value {
                    Value::Array(items) => slot.extend(items.iter().cloned()),
                    other => slot.push(other.clone()),
                }
            }
        }
    }

    for (property, items) in accumulated {
        node.set(&property, Value::Array(items));
    }
}

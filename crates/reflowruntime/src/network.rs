//! Builds one shared execution stream per node of a workflow.
//!
//! Construction is memoized and recursive: a node's stream is derived from
//! the streams of its upstream sources, so every node is built exactly once
//! and a node revisited while still under construction is a cycle.

use crate::combine::{self, PacketStream};
use crate::dataflow::{self, SourceEdges};
use crate::executor::{counter, execute_node, ExecutionEnv};
use crate::multicast::SharedStream;
use futures::future::{self, FutureExt};
use futures::stream::{self, select_all, BoxStream, StreamExt};
use reflowcore::{NodeId, NodeInstance, NodeMeta, Workflow, WorkflowError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Upper bound on partial sources considered when searching for covering
/// combinations
const MAX_COMBINATION_CANDIDATES: usize = 16;

pub struct NetworkBuilder<'a> {
    workflow: &'a Workflow,
    env: ExecutionEnv,
    replay: HashSet<NodeId>,
    memo: HashMap<NodeId, SharedStream>,
    in_progress: Vec<NodeId>,
}

/// Built network: the shared stream of every node, in workflow order
pub struct Network {
    nodes: Vec<SharedStream>,
    replayed: HashSet<NodeId>,
}

impl Network {
    /// Snapshots of every executing node, merged; replayed nodes are left out
    pub fn output(&self) -> BoxStream<'static, NodeInstance> {
        select_all(
            self.nodes
                .iter()
                .filter(|s| !self.replayed.contains(s.node_id()))
                .map(SharedStream::subscribe),
        )
        .boxed()
    }
}

impl<'a> NetworkBuilder<'a> {
    pub fn new(workflow: &'a Workflow, env: ExecutionEnv) -> Self {
        Self {
            workflow,
            env,
            replay: HashSet::new(),
            memo: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Nodes that emit their historical snapshot instead of executing
    pub fn with_replay(mut self, replay: HashSet<NodeId>) -> Self {
        self.replay = replay;
        self
    }

    pub fn build(mut self) -> Result<Network, WorkflowError> {
        let mut nodes = Vec::with_capacity(self.workflow.nodes.len());
        for node in &self.workflow.nodes {
            nodes.push(self.node_stream(&node.id)?);
        }
        tracing::debug!(
            "Built network for workflow {} ({} nodes, {} replayed)",
            self.workflow.id,
            nodes.len(),
            self.replay.len()
        );
        Ok(Network {
            nodes,
            replayed: self.replay,
        })
    }

    fn node_stream(&mut self, id: &str) -> Result<SharedStream, WorkflowError> {
        if let Some(stream) = self.memo.get(id) {
            return Ok(stream.clone());
        }
        if self.in_progress.iter().any(|n| n == id) {
            let mut path = self.in_progress.clone();
            path.push(id.to_string());
            return Err(WorkflowError::CycleDetected { path });
        }

        let workflow = self.workflow;
        let node = workflow
            .find_node(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;

        let stream = if self.replay.contains(id) {
            tracing::debug!("Replaying historical result of node {}", id);
            SharedStream::new(id, stream::once(future::ready(node.clone())).boxed())
        } else if workflow.is_entry(id) {
            let execution = execute_node(self.env.clone(), node.clone(), counter(node));
            SharedStream::new(id, execution)
        } else {
            self.in_progress.push(id.to_string());
            let built = self.dependent_stream(node);
            self.in_progress.pop();
            built?
        };

        self.memo.insert(id.to_string(), stream.clone());
        Ok(stream)
    }

    fn dependent_stream(&mut self, node: &NodeInstance) -> Result<SharedStream, WorkflowError> {
        let workflow = self.workflow;
        let groups = SourceEdges::partition(workflow.incoming(&node.id));

        let mut upstream = Vec::with_capacity(groups.len());
        for group in &groups {
            if !workflow.contains_node(&group.source) {
                return Err(WorkflowError::InvalidConnection(format!(
                    "edge {} -> {} references missing source node",
                    group.source, node.id
                )));
            }
            upstream.push(self.node_stream(&group.source)?);
        }

        let meta = node.meta().cloned();
        let required: Vec<&str> = meta
            .as_deref()
            .map(NodeMeta::required_inputs)
            .unwrap_or_default();
        let bundled: Vec<&str> = required
            .iter()
            .copied()
            .filter(|p| meta.as_deref().is_some_and(|m| m.aggregation(p).is_multi()))
            .collect();

        let combinations = match covering_combinations(&groups, &required, &bundled) {
            Some(found) => found,
            None => {
                tracing::warn!(
                    "No source combination of node {} covers required inputs {:?}, waiting on all sources",
                    node.id,
                    required
                );
                vec![(0..groups.len()).collect()]
            }
        };
        let optional = optional_sources(&groups, &required);

        let mut triggers = Vec::with_capacity(combinations.len());
        for combination in combinations {
            let sources: Vec<PacketStream> = combination
                .iter()
                .map(|&g| source_packets(&groups[g], &upstream[g], meta.clone()))
                .collect();
            let edges = combination
                .iter()
                .flat_map(|&g| groups[g].edges.iter().map(|(_, e)| e));
            let mode = combine::resolve_mode(edges);
            let primary = combination
                .iter()
                .position(|&g| groups[g].edges.iter().any(|(_, e)| e.is_primary));
            let trigger = combine::combine(mode, sources, primary);

            let riders: Vec<PacketStream> = optional
                .iter()
                .filter(|&&g| !combination.contains(&g))
                .map(|&g| source_packets(&groups[g], &upstream[g], meta.clone()))
                .collect();
            triggers.push(combine::attach_optional(trigger, riders));
        }

        let env = self.env.clone();
        let template = node.clone();
        let completed = counter(node);
        let execution = select_all(triggers)
            .flat_map(move |packets| {
                let mut instance = template.fresh_copy();
                dataflow::assign(&mut instance, &packets);
                execute_node(env.clone(), instance, Arc::clone(&completed))
            })
            .boxed();

        Ok(SharedStream::new(node.id.clone(), execution))
    }
}

/// Snapshots of one upstream source reduced to the packets its edges deliver.
///
/// A source feeding any buffer-mode input is collected until it completes
/// and delivered as a single packet.
fn source_packets(
    group: &SourceEdges,
    upstream: &SharedStream,
    meta: Option<Arc<NodeMeta>>,
) -> PacketStream {
    let buffered = meta.as_deref().is_some_and(|m| {
        group
            .target_properties()
            .any(|p| m.aggregation(p).is_buffer())
    });
    let edges = group.clone();
    let packets = upstream
        .subscribe()
        .filter(|snapshot| future::ready(snapshot.has_data()))
        .filter_map(move |snapshot| future::ready(edges.extract(&snapshot)));

    if buffered {
        packets
            .collect::<Vec<_>>()
            .map(move |all| dataflow::coalesce(meta.as_deref(), all))
            .into_stream()
            .filter_map(future::ready)
            .boxed()
    } else {
        packets.boxed()
    }
}

/// Every minimal set of sources whose edges jointly cover `required`.
///
/// Sources that cover everything on their own are preferred. With nothing
/// required, all sources form one combination. Every source feeding a
/// `bundled` (multi-aggregated) property joins each combination, so the
/// property receives one value per source. `None` when no combination
/// covers the required inputs.
pub fn covering_combinations(
    groups: &[SourceEdges],
    required: &[&str],
    bundled: &[&str],
) -> Option<Vec<Vec<usize>>> {
    if groups.is_empty() {
        return Some(Vec::new());
    }
    if required.is_empty() {
        return Some(vec![(0..groups.len()).collect()]);
    }

    let coverage: Vec<HashSet<&str>> = groups
        .iter()
        .map(|g| {
            g.target_properties()
                .filter(|p| required.contains(p))
                .collect()
        })
        .collect();
    let bundle: Vec<usize> = coverage
        .iter()
        .enumerate()
        .filter(|(_, covered)| covered.iter().any(|p| bundled.contains(p)))
        .map(|(i, _)| i)
        .collect();

    let singles: Vec<Vec<usize>> = coverage
        .iter()
        .enumerate()
        .filter(|(_, covered)| covered.len() == required.len())
        .map(|(i, _)| vec![i])
        .collect();
    if !singles.is_empty() {
        return Some(with_bundle(singles, &bundle));
    }

    let candidates: Vec<usize> = coverage
        .iter()
        .enumerate()
        .filter(|(_, covered)| !covered.is_empty())
        .map(|(i, _)| i)
        .take(MAX_COMBINATION_CANDIDATES)
        .collect();

    let mut masks: Vec<u32> = (1..(1u32 << candidates.len())).collect();
    masks.sort_by_key(|m| (m.count_ones(), *m));

    let mut found: Vec<u32> = Vec::new();
    for mask in masks {
        if found.iter().any(|f| f & mask == *f) {
            continue;
        }
        let covered: HashSet<&str> = candidates
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .flat_map(|(_, &g)| coverage[g].iter().copied())
            .collect();
        if covered.len() == required.len() {
            found.push(mask);
        }
    }

    if found.is_empty() {
        return None;
    }
    let combinations = found
        .into_iter()
        .map(|mask| {
            candidates
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, &g)| g)
                .collect()
        })
        .collect();
    Some(with_bundle(combinations, &bundle))
}

fn with_bundle(combinations: Vec<Vec<usize>>, bundle: &[usize]) -> Vec<Vec<usize>> {
    let mut out: Vec<Vec<usize>> = Vec::with_capacity(combinations.len());
    for mut combination in combinations {
        let missing: Vec<usize> = bundle
            .iter()
            .copied()
            .filter(|g| !combination.contains(g))
            .collect();
        combination.extend(missing);
        combination.sort_unstable();
        if !out.contains(&combination) {
            out.push(combination);
        }
    }
    out
}

/// Sources that feed no required input. Their latest value rides along with
/// every trigger instead of being dropped.
pub fn optional_sources(groups: &[SourceEdges], required: &[&str]) -> Vec<usize> {
    if required.is_empty() {
        return Vec::new();
    }
    groups
        .iter()
        .enumerate()
        .filter(|(_, g)| !g.target_properties().any(|p| required.contains(&p)))
        .map(|(i, _)| i)
        .collect()
}

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use reflowcore::{NodeId, Workflow, WorkflowError};
use std::collections::{HashMap, HashSet};

/// Node-level dependency graph of a workflow; edge weights are the edge's
/// declaration index.
pub struct DependencyGraph {
    graph: DiGraph<NodeId, usize>,
    index: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph, rejecting edges that reference missing nodes
    pub fn build(workflow: &Workflow) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in &workflow.nodes {
            let idx = graph.add_node(node.id.clone());
            index.insert(node.id.clone(), idx);
        }

        for (i, edge) in workflow.edges.iter().enumerate() {
            let from = index.get(&edge.from).ok_or_else(|| {
                WorkflowError::InvalidConnection(format!(
                    "edge {} -> {} references missing source node {}",
                    edge.from, edge.to, edge.from
                ))
            })?;
            let to = index.get(&edge.to).ok_or_else(|| {
                WorkflowError::InvalidConnection(format!(
                    "edge {} -> {} references missing target node {}",
                    edge.from, edge.to, edge.to
                ))
            })?;
            graph.add_edge(*from, *to, i);
        }

        Ok(Self { graph, index })
    }

    /// `id` plus every node reachable from it
    pub fn downstream(&self, id: &str) -> HashSet<NodeId> {
        let mut reached = HashSet::new();
        let Some(start) = self.index.get(id) else {
            return reached;
        };
        let mut dfs = Dfs::new(&self.graph, *start);
        while let Some(idx) = dfs.next(&self.graph) {
            reached.insert(self.graph[idx].clone());
        }
        reached
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

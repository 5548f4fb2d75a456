use crate::compiler::compile_workflow;
use crate::executor::ExecutionEnv;
use crate::graph::DependencyGraph;
use crate::network::{Network, NetworkBuilder};
use crate::planner::{self, Plan};
use crate::policy::AbortSignal;
use crate::registry::NodeRegistry;
use futures::stream::{BoxStream, StreamExt};
use reflowcore::{
    apply_snapshot, EventBus, EventKind, ExecutionId, FlowEvent, NodeId, NodeInstance, NodeState,
    Workflow, WorkflowError, WorkflowState,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Prepares workflows for execution: compiles nodes, validates structure and
/// builds the stream network.
pub struct Scheduler {
    registry: Arc<NodeRegistry>,
    events: Arc<EventBus>,
}

impl Scheduler {
    pub fn new(registry: Arc<NodeRegistry>, events: Arc<EventBus>) -> Self {
        Self { registry, events }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Full run: every node is reset and executes.
    ///
    /// Structural errors (unknown type, broken edge, cycle) are reported here,
    /// before any handler runs.
    pub fn schedule(&self, workflow: &Workflow) -> Result<Execution, WorkflowError> {
        let mut prepared = workflow.clone();
        compile_workflow(&self.registry, &mut prepared)?;
        DependencyGraph::build(&prepared)?;

        let entries: HashSet<NodeId> = prepared.entry_nodes().into_iter().cloned().collect();
        for node in &mut prepared.nodes {
            node.reset_transient(!entries.contains(&node.id));
        }
        prepared.state = WorkflowState::Pending;

        tracing::info!("Scheduling workflow {} ({} nodes)", prepared.id, prepared.nodes.len());
        self.launch(prepared, HashSet::new())
    }

    /// Incremental run: re-execute `changed` and its downstream closure,
    /// replaying the historical result of every other node.
    pub fn fine_tune(&self, workflow: &Workflow, changed: &str) -> Result<Execution, WorkflowError> {
        let mut prepared = workflow.clone();
        compile_workflow(&self.registry, &mut prepared)?;
        let graph = DependencyGraph::build(&prepared)?;

        let affected = match planner::plan(&prepared, &graph, changed)? {
            Plan::Full => return self.schedule(workflow),
            Plan::Incremental { affected } => affected,
        };

        let entries: HashSet<NodeId> = prepared.entry_nodes().into_iter().cloned().collect();
        for node in prepared.nodes.iter_mut().filter(|n| affected.contains(&n.id)) {
            node.reset_for_rerun(!entries.contains(&node.id));
        }
        let replay: HashSet<NodeId> = prepared
            .nodes
            .iter()
            .map(|n| n.id.clone())
            .filter(|id| !affected.contains(id))
            .collect();

        tracing::info!(
            "Fine-tuning workflow {} from {} ({} affected, {} replayed)",
            prepared.id,
            changed,
            affected.len(),
            replay.len()
        );
        self.launch(prepared, replay)
    }

    /// Compile and build the network without running anything
    pub fn validate(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        let mut prepared = workflow.clone();
        compile_workflow(&self.registry, &mut prepared)?;
        DependencyGraph::build(&prepared)?;
        let (env, _) = self.env(&prepared);
        NetworkBuilder::new(&prepared, env).build()?;
        Ok(())
    }

    fn env(&self, workflow: &Workflow) -> (ExecutionEnv, CancellationToken) {
        let cancellation = CancellationToken::new();
        let env = ExecutionEnv {
            registry: Arc::clone(&self.registry),
            events: Arc::clone(&self.events),
            workflow_id: workflow.id.clone(),
            execution_id: ExecutionId::new_v4(),
            cancellation: cancellation.clone(),
            abort: Arc::new(AbortSignal::new(cancellation.clone())),
        };
        (env, cancellation)
    }

    fn launch(&self, workflow: Workflow, replay: HashSet<NodeId>) -> Result<Execution, WorkflowError> {
        let (env, cancellation) = self.env(&workflow);
        let network: Network = NetworkBuilder::new(&workflow, env.clone())
            .with_replay(replay)
            .build()?;

        Ok(Execution {
            execution_id: env.execution_id,
            stream: network.output(),
            workflow,
            cancellation,
            abort: env.abort,
            events: env.events,
        })
    }
}

/// A scheduled, not yet consumed workflow run
pub struct Execution {
    execution_id: ExecutionId,
    workflow: Workflow,
    stream: BoxStream<'static, NodeInstance>,
    cancellation: CancellationToken,
    abort: Arc<AbortSignal>,
    events: Arc<EventBus>,
}

impl Execution {
    pub fn id(&self) -> ExecutionId {
        self.execution_id
    }

    /// The compiled and reset workflow this run starts from
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Outward cancellation signal; handlers observe child tokens of it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Raw merged snapshot stream of every executing node, without event
    /// publication or state folding
    pub fn into_stream(self) -> BoxStream<'static, NodeInstance> {
        self.stream
    }

    /// Drive the run to completion, publishing lifecycle events and folding
    /// every snapshot into the workflow
    pub async fn run(self) -> ExecutionResult {
        let Execution {
            execution_id,
            mut workflow,
            stream,
            cancellation,
            abort,
            events,
        } = self;
        let started = Instant::now();
        let workflow_id = workflow.id.clone();

        tracing::info!("Starting workflow execution: {} ({})", workflow_id, execution_id);
        events.emit(
            FlowEvent::workflow(EventKind::WorkflowStart, workflow_id.clone())
                .with_payload(serde_json::json!({ "executionId": execution_id })),
        );
        workflow.state = WorkflowState::Running;

        let mut snapshots = stream.take_until(Box::pin(cancellation.clone().cancelled_owned()));
        while let Some(snapshot) = snapshots.next().await {
            if let Some(kind) = EventKind::for_node_state(snapshot.state) {
                events.emit(FlowEvent::node(kind, workflow_id.clone(), &snapshot));
            }
            apply_snapshot(&mut workflow, snapshot);
        }

        let aborted = abort.is_triggered();
        if let Some(snapshot) = abort.take_snapshot() {
            apply_snapshot(&mut workflow, snapshot);
        }
        let cancelled = !aborted && cancellation.is_cancelled();
        if cancelled {
            tracing::warn!("Workflow {} cancelled", workflow_id);
        }
        // nodes never triggered stay pending and do not hold the run open
        workflow.state = match workflow.derive_state() {
            _ if aborted || cancelled => WorkflowState::Fail,
            WorkflowState::Pending => WorkflowState::Success,
            state => state,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let result = ExecutionResult {
            execution_id,
            completed_nodes: workflow.nodes.iter().filter(|n| n.state.is_terminal()).count(),
            total_nodes: workflow.nodes.len(),
            aborted,
            cancelled,
            duration_ms,
            workflow,
        };

        let kind = if result.state() == WorkflowState::Success {
            EventKind::WorkflowComplete
        } else {
            EventKind::WorkflowFail
        };
        events.emit(FlowEvent::workflow(kind, workflow_id.clone()).with_payload(serde_json::json!({
            "executionId": execution_id,
            "state": result.state(),
            "failedNodes": result.failed_nodes(),
            "durationMs": duration_ms,
        })));
        tracing::info!(
            "Workflow {} finished as {:?} in {}ms ({}/{} nodes terminal)",
            workflow_id,
            result.state(),
            duration_ms,
            result.completed_nodes,
            result.total_nodes
        );
        result
    }
}

/// Result of workflow execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub workflow: Workflow,
    pub completed_nodes: usize,
    pub total_nodes: usize,
    pub aborted: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn state(&self) -> WorkflowState {
        self.workflow.state
    }

    pub fn is_success(&self) -> bool {
        self.state() == WorkflowState::Success
    }

    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.workflow
            .nodes
            .iter()
            .filter(|n| n.state == NodeState::Fail)
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.workflow.find_node(id)
    }
}

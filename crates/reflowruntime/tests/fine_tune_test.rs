// crates/reflowruntime/tests/fine_tune_test.rs

mod common;

use common::{node, registry, Calls};
use reflowcore::{EventBus, EventKind, FlowError, NodeState, Workflow, WorkflowError};
use reflowruntime::{FlowRuntime, RuntimeConfig, Scheduler};
use std::sync::Arc;

fn scheduler(calls: &Calls) -> Scheduler {
    common::init_tracing();
    Scheduler::new(Arc::new(registry(calls)), Arc::new(EventBus::default()))
}

/// a -> b -> c, with `a` seeded
fn chain() -> Workflow {
    let mut workflow = Workflow::new("chain").with_id("chain");
    workflow.add_node(node("a", "test.source").with_field("input", "x"));
    workflow.add_node(node("b", "test.pass"));
    workflow.add_node(node("c", "test.pass"));
    workflow.connect("a", "output", "b", "input");
    workflow.connect("b", "output", "c", "input");
    workflow
}

#[tokio::test]
async fn test_fine_tune_replays_unaffected_upstream() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let first = scheduler.schedule(&chain()).unwrap().run().await;
    assert!(first.is_success());

    let second = scheduler.fine_tune(&first.workflow, "b").unwrap().run().await;

    assert!(second.is_success());
    assert_eq!(calls.count("a"), 1, "Upstream node must not be re-invoked");
    assert_eq!(second.node("a").unwrap().count, 1);
    assert_eq!(second.node("b").unwrap().count, 2);
    assert_eq!(second.node("c").unwrap().count, 2);
    assert_eq!(
        second.node("c").unwrap().get("output").and_then(|v| v.as_str()),
        Some("x"),
        "Replayed output should flow into the re-run nodes"
    );
}

#[tokio::test]
async fn test_fine_tune_with_pending_upstream_runs_everything() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let result = scheduler.fine_tune(&chain(), "b").unwrap().run().await;

    assert!(result.is_success());
    assert_eq!(calls.count("a"), 1, "Full run should execute the never-run upstream");
    assert_eq!(result.node("c").unwrap().state, NodeState::Success);
}

#[tokio::test]
async fn test_fine_tune_rejects_running_upstream() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = scheduler.schedule(&chain()).unwrap().run().await.workflow;
    workflow.find_node_mut("a").unwrap().state = NodeState::Running;

    let error = scheduler.fine_tune(&workflow, "b").err().expect("running upstream is invalid");
    assert!(
        matches!(error, WorkflowError::UpstreamIncomplete { ref node_id, state: NodeState::Running } if node_id == "a"),
        "unexpected error: {error:?}"
    );
}

#[tokio::test]
async fn test_fine_tune_unknown_node() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let error = scheduler.fine_tune(&chain(), "zzz").err().expect("unknown node");
    assert_eq!(error, WorkflowError::NodeNotFound("zzz".to_string()));
}

#[tokio::test]
async fn test_runtime_update_then_fine_tune() {
    common::init_tracing();
    let calls = Calls::default();
    let runtime = FlowRuntime::with_registry(Arc::new(registry(&calls)), RuntimeConfig::default());

    let id = runtime.register_workflow(chain()).await;
    let first = runtime.execute_workflow(&id).await.unwrap();
    assert!(first.is_success());

    let mut updates = runtime.subscribe_to(&[EventKind::NodeUpdated]);
    let edited = runtime
        .workflow(&id)
        .await
        .and_then(|wf| wf.find_node("a").cloned())
        .unwrap()
        .with_field("input", "y");
    runtime.update_node(&id, edited).await.unwrap();

    let event = updates.try_recv().expect("update should be published");
    assert_eq!(event.node_id.as_deref(), Some("a"));

    let second = runtime.fine_tune_workflow(&id, "a").await.unwrap();
    assert!(second.is_success());
    assert_eq!(
        second.node("c").unwrap().get("output").and_then(|v| v.as_str()),
        Some("y")
    );
    for node_id in ["a", "b", "c"] {
        assert_eq!(second.node(node_id).unwrap().count, 2, "{node_id} should have run twice");
    }

    let stored = runtime.workflow(&id).await.unwrap();
    assert_eq!(stored.find_node("c").unwrap().count, 2, "Final state is kept for the next run");
}

#[tokio::test]
async fn test_runtime_unknown_workflow() {
    let runtime = FlowRuntime::new();
    let error = runtime.execute_workflow("missing").await.unwrap_err();
    assert!(matches!(error, FlowError::Workflow(WorkflowError::NotFound(_))));
}

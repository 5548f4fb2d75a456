// crates/reflowruntime/tests/scheduler_test.rs

mod common;

use common::{node, numbers, registry, strings, Calls};
use reflowcore::{Edge, EventBus, MergeMode, NodeState, Workflow, WorkflowError, WorkflowState};
use reflowruntime::Scheduler;
use std::sync::Arc;
use std::time::Duration;

fn scheduler(calls: &Calls) -> Scheduler {
    common::init_tracing();
    Scheduler::new(Arc::new(registry(calls)), Arc::new(EventBus::default()))
}

#[tokio::test(start_paused = true)]
async fn test_unconnected_nodes_run_concurrently() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("parallel");
    workflow.add_node(node("a", "test.sleep"));
    workflow.add_node(node("b", "test.sleep"));

    let started = tokio::time::Instant::now();
    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success(), "Both sleeps should succeed");
    assert!(
        started.elapsed() < Duration::from_millis(150),
        "Two 100ms nodes without edges should overlap, took {:?}",
        started.elapsed()
    );
    assert_eq!(calls.count("a"), 1);
    assert_eq!(calls.count("b"), 1);
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_handler_runs() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("loop");
    workflow.add_node(node("a", "test.source"));
    workflow.add_node(node("b", "test.source"));
    workflow.add_edge(Edge::data("a", "output", "b", "input"));
    workflow.add_edge(Edge::data("b", "output", "a", "input"));

    let error = scheduler.schedule(&workflow).err().expect("cycle should be rejected");
    match error {
        WorkflowError::CycleDetected { path } => {
            assert!(path.contains(&"a".to_string()), "Cycle path should name a: {path:?}");
            assert!(path.contains(&"b".to_string()), "Cycle path should name b: {path:?}");
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }
    assert_eq!(calls.total(), 0, "No handler may run for a cyclic workflow");
}

#[tokio::test]
async fn test_multi_input_collects_every_source() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("collector");
    workflow.add_node(node("a", "test.source").with_field("input", "01"));
    workflow.add_node(node("b", "test.source").with_field("input", "02"));
    workflow.add_node(node("c", "test.collect"));
    workflow.connect("a", "output", "c", "items");
    workflow.connect("b", "output", "c", "items");

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert_eq!(result.state(), WorkflowState::Success);
    let collector = result.node("c").unwrap();
    assert_eq!(strings(collector.get("items")), vec!["01", "02"]);
    assert_eq!(strings(collector.get("output")), vec!["01", "02"]);
    assert_eq!(calls.count("c"), 1, "Collector should run once with both values");
}

#[tokio::test]
async fn test_multi_input_orders_by_edge_weight() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("weights");
    workflow.add_node(node("a", "test.source").with_field("input", "first"));
    workflow.add_node(node("b", "test.source").with_field("input", "second"));
    workflow.add_node(node("c", "test.collect"));
    workflow.add_edge(Edge::data("a", "output", "c", "items").with_weight(2));
    workflow.add_edge(Edge::data("b", "output", "c", "items").with_weight(1));

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert_eq!(
        strings(result.node("c").unwrap().get("items")),
        vec!["second", "first"],
        "Lower weight should come first"
    );
}

#[tokio::test]
async fn test_buffer_input_waits_for_upstream_completion() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("buffer");
    workflow.add_node(node("emit", "test.emit"));
    workflow.add_node(node("buf", "test.buffer"));
    workflow.connect("emit", "output", "buf", "items");

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success());
    let emitter = result.node("emit").unwrap();
    assert_eq!(emitter.emit_count, 3);
    let buffer = result.node("buf").unwrap();
    assert_eq!(buffer.get("count").and_then(|v| v.as_f64()), Some(3.0));
    assert_eq!(calls.count("buf"), 1, "Buffer node should execute once");
}

#[tokio::test]
async fn test_each_emission_triggers_downstream() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("stream");
    workflow.add_node(node("emit", "test.emit"));
    workflow.add_node(node("pass", "test.pass"));
    workflow.connect("emit", "output", "pass", "input");

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    let pass = result.node("pass").unwrap();
    assert_eq!(calls.count("pass"), 3);
    assert_eq!(pass.count, 3, "Every completed execution should be counted");
    assert_eq!(pass.get("output").and_then(|v| v.as_f64()), Some(3.0));
}

#[tokio::test]
async fn test_merge_mode_fires_per_source_emission() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("merge");
    workflow.add_node(node("emit", "test.emit").with_field("times", 2i64));
    workflow.add_node(node("one", "test.source").with_field("input", "x"));
    workflow.add_node(node("c", "test.collect"));
    workflow.add_edge(Edge::data("emit", "output", "c", "items").with_mode(MergeMode::Merge));
    workflow.add_edge(Edge::data("one", "output", "c", "items").with_mode(MergeMode::Merge));

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success());
    assert_eq!(calls.count("c"), 3, "Each of the three emissions should trigger the collector");
}

#[tokio::test]
async fn test_scheduling_twice_starts_from_scratch() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("twice");
    workflow.add_node(node("a", "test.source").with_field("input", "v"));
    workflow.add_node(node("b", "test.pass"));
    workflow.connect("a", "output", "b", "input");

    let first = scheduler.schedule(&workflow).unwrap().run().await;
    let second = scheduler.schedule(&first.workflow).unwrap().run().await;

    for result in [&first, &second] {
        assert!(result.is_success());
        assert_eq!(result.node("a").unwrap().count, 1);
        assert_eq!(result.node("b").unwrap().count, 1);
    }
    assert_eq!(calls.count("b"), 2);
}

#[tokio::test]
async fn test_unset_router_output_leaves_branch_pending() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("router");
    workflow.add_node(node("branch", "test.branch").with_field("flag", false));
    workflow.add_node(node("yes", "test.pass"));
    workflow.add_node(node("no", "test.pass"));
    workflow.connect("branch", "yes", "yes", "input");
    workflow.connect("branch", "no", "no", "input");

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert_eq!(result.state(), WorkflowState::Success, "Untaken branches do not fail the run");
    assert_eq!(result.node("yes").unwrap().state, NodeState::Pending);
    assert_eq!(result.node("no").unwrap().state, NodeState::Success);
    assert_eq!(calls.count("yes"), 0);
}

#[tokio::test]
async fn test_unknown_node_type_is_rejected() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("unknown");
    workflow.add_node(node("a", "test.nope"));

    let error = scheduler.schedule(&workflow).err().expect("unknown type should be rejected");
    assert_eq!(error, WorkflowError::TypeNotFound("test.nope".to_string()));
}

#[tokio::test]
async fn test_cancel_stops_the_run() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("cancel");
    workflow.add_node(node("slow", "test.sleep").with_field("ms", 60_000i64));

    let execution = scheduler.schedule(&workflow).unwrap();
    let token = execution.cancellation_token();
    let handle = tokio::spawn(execution.run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = handle.await.unwrap();
    assert!(result.cancelled);
    assert_eq!(result.state(), WorkflowState::Fail);
}

#[tokio::test]
async fn test_required_multi_input_runs_once_with_every_source() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("required-collector");
    workflow.add_node(node("a", "test.source").with_field("input", "01"));
    workflow.add_node(node("b", "test.source").with_field("input", "02"));
    workflow.add_node(node("c", "test.gather"));
    workflow.connect("a", "output", "c", "items");
    workflow.connect("b", "output", "c", "items");

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success());
    assert_eq!(calls.count("c"), 1, "Required multi input should wait for both sources");
    assert_eq!(strings(result.node("c").unwrap().get("items")), vec!["01", "02"]);
}

#[tokio::test]
async fn test_optional_input_source_is_delivered() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("optional");
    workflow.add_node(node("a", "test.source").with_field("input", "req"));
    workflow.add_node(node("b", "test.source").with_field("input", "side"));
    workflow.add_node(node("c", "test.optional"));
    workflow.connect("a", "output", "c", "value");
    workflow.connect("b", "output", "c", "extra");

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    let target = result.node("c").unwrap();
    assert_eq!(target.state, NodeState::Success);
    assert_eq!(target.get("value").and_then(|v| v.as_str()), Some("req"));
    assert_eq!(
        target.get("extra").and_then(|v| v.as_str()),
        Some("side"),
        "Edges into optional inputs should carry their value"
    );
    assert_eq!(calls.count("c"), 1, "Optional sources should not trigger on their own");
}

#[tokio::test]
async fn test_untaken_optional_branch_does_not_block() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("optional-router");
    workflow.add_node(node("a", "test.source").with_field("input", "req"));
    workflow.add_node(node("branch", "test.branch").with_field("flag", false));
    workflow.add_node(node("c", "test.optional"));
    workflow.connect("a", "output", "c", "value");
    workflow.connect("branch", "yes", "c", "extra");

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success());
    assert_eq!(calls.count("c"), 1);
    assert_eq!(result.node("c").unwrap().get("value").and_then(|v| v.as_str()), Some("req"));
}

#[tokio::test]
async fn test_zip_pairs_emissions_by_index() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("zip");
    workflow.add_node(node("a", "test.emit").with_field("times", 3i64));
    workflow.add_node(node("b", "test.emit").with_field("times", 2i64).with_field("start", 11i64));
    workflow.add_node(node("pair", "test.pair"));
    workflow.add_edge(Edge::data("a", "output", "pair", "left").with_mode(MergeMode::Zip));
    workflow.add_edge(Edge::data("b", "output", "pair", "right").with_mode(MergeMode::Zip));

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success());
    let pairs: Vec<Vec<f64>> = calls.seen("pair").iter().map(|v| numbers(Some(v))).collect();
    assert_eq!(pairs, vec![vec![1.0, 11.0], vec![2.0, 12.0]], "ZIP should stop at the shorter source");
}

#[tokio::test(start_paused = true)]
async fn test_with_latest_from_fires_only_on_primary() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    // q emits at 100ms and 200ms, r at 60ms, 120ms and 180ms
    let mut workflow = Workflow::new("with-latest");
    workflow.add_node(
        node("q", "test.emit")
            .with_field("times", 2i64)
            .with_field("interval_ms", 100i64),
    );
    workflow.add_node(
        node("r", "test.emit")
            .with_field("start", 11i64)
            .with_field("interval_ms", 60i64),
    );
    workflow.add_node(node("pair", "test.pair"));
    workflow.add_edge(
        Edge::data("q", "output", "pair", "left")
            .with_mode(MergeMode::WithLatestFrom)
            .primary(),
    );
    workflow.add_edge(Edge::data("r", "output", "pair", "right").with_mode(MergeMode::WithLatestFrom));

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success());
    let pairs: Vec<Vec<f64>> = calls.seen("pair").iter().map(|v| numbers(Some(v))).collect();
    assert_eq!(pairs, vec![vec![1.0, 11.0], vec![2.0, 13.0]]);
}

#[tokio::test(start_paused = true)]
async fn test_with_latest_from_without_primary_combines_latest() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("with-latest-fallback");
    workflow.add_node(
        node("q", "test.emit")
            .with_field("times", 2i64)
            .with_field("interval_ms", 100i64),
    );
    workflow.add_node(
        node("r", "test.emit")
            .with_field("start", 11i64)
            .with_field("interval_ms", 60i64),
    );
    workflow.add_node(node("pair", "test.pair"));
    workflow.add_edge(Edge::data("q", "output", "pair", "left").with_mode(MergeMode::WithLatestFrom));
    workflow.add_edge(Edge::data("r", "output", "pair", "right").with_mode(MergeMode::WithLatestFrom));

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success());
    let pairs: Vec<Vec<f64>> = calls.seen("pair").iter().map(|v| numbers(Some(v))).collect();
    assert_eq!(
        pairs,
        vec![
            vec![1.0, 11.0],
            vec![1.0, 12.0],
            vec![1.0, 13.0],
            vec![2.0, 13.0]
        ],
        "Without a primary edge every emission should re-trigger"
    );
}

#[tokio::test(start_paused = true)]
async fn test_combine_latest_retriggers_on_each_emission() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("combine-latest");
    workflow.add_node(node("a", "test.emit").with_field("interval_ms", 10i64));
    workflow.add_node(node("b", "test.source").with_field("input", 5i64));
    workflow.add_node(node("pair", "test.pair"));
    workflow.connect("a", "output", "pair", "left");
    workflow.connect("b", "output", "pair", "right");

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success());
    let pairs: Vec<Vec<f64>> = calls.seen("pair").iter().map(|v| numbers(Some(v))).collect();
    assert_eq!(pairs, vec![vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0]]);
    assert_eq!(result.node("pair").unwrap().count, 3);
}

#[tokio::test]
async fn test_multi_buffer_input_flattens_every_source() {
    let calls = Calls::default();
    let scheduler = scheduler(&calls);

    let mut workflow = Workflow::new("flatten");
    workflow.add_node(node("a", "test.emit").with_field("times", 2i64));
    workflow.add_node(node("b", "test.emit").with_field("times", 1i64).with_field("start", 10i64));
    workflow.add_node(node("flat", "test.flatten"));
    workflow.connect("a", "output", "flat", "items");
    workflow.connect("b", "output", "flat", "items");

    let result = scheduler.schedule(&workflow).unwrap().run().await;

    assert!(result.is_success());
    assert_eq!(calls.count("flat"), 1, "Buffered sources should trigger once together");
    assert_eq!(numbers(result.node("flat").unwrap().get("items")), vec![1.0, 2.0, 10.0]);
}

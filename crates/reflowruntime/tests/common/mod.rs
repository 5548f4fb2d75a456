// Shared node types and helpers for the runtime integration tests
#![allow(dead_code)]

use futures::stream::{self, StreamExt};
use reflowcore::{
    handler_fn, ErrorPolicy, ErrorStrategy, InputSpec, NodeError, NodeHandler, NodeInstance,
    OutputSpec, ResultProducer, Value,
};
use reflowruntime::{NodeRegistry, NodeType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Handler invocations per node id, plus values some handlers log per call
#[derive(Clone, Default)]
pub struct Calls {
    counts: Arc<Mutex<HashMap<String, usize>>>,
    seen: Arc<Mutex<HashMap<String, Vec<Value>>>>,
}

impl Calls {
    pub fn record(&self, id: &str) {
        *self.counts.lock().unwrap().entry(id.to_string()).or_default() += 1;
    }

    pub fn count(&self, id: &str) -> usize {
        self.counts.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }

    pub fn log(&self, id: &str, value: Value) {
        self.seen.lock().unwrap().entry(id.to_string()).or_default().push(value);
    }

    /// Values logged by `id`, one per call
    pub fn seen(&self, id: &str) -> Vec<Value> {
        self.seen.lock().unwrap().get(id).cloned().unwrap_or_default()
    }
}

fn sync_handler<F>(calls: &Calls, f: F) -> impl NodeHandler + 'static
where
    F: Fn(NodeInstance) -> Result<NodeInstance, NodeError> + Send + Sync + 'static,
{
    let calls = calls.clone();
    handler_fn(move |node, _ctx| {
        calls.record(&node.id);
        f(node).map(ResultProducer::from_value)
    })
}

fn copy(
    from: &'static str,
    to: &'static str,
) -> impl Fn(NodeInstance) -> Result<NodeInstance, NodeError> + Send + Sync + 'static {
    move |mut node| {
        let value = node.get(from).cloned().unwrap_or_default();
        node.set(to, value);
        Ok(node)
    }
}

fn failing(
    error: NodeError,
) -> impl Fn(NodeInstance) -> Result<NodeInstance, NodeError> + Send + Sync + 'static {
    move |_| Err(error.clone())
}

/// Registry with every test node type, recording invocations into `calls`
pub fn registry(calls: &Calls) -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register(
        NodeType::new("test.source")
            .input(InputSpec::new("input"))
            .output(OutputSpec::new("output"))
            .handler(sync_handler(calls, copy("input", "output"))),
    );
    registry.register(
        NodeType::new("test.pass")
            .input(InputSpec::new("input").required())
            .output(OutputSpec::new("output"))
            .handler(sync_handler(calls, copy("input", "output"))),
    );
    registry.register(
        NodeType::new("test.collect")
            .input(InputSpec::new("items").multi().with_default(Value::Array(Vec::new())))
            .output(OutputSpec::new("output"))
            .handler(sync_handler(calls, copy("items", "output"))),
    );
    registry.register(
        NodeType::new("test.buffer")
            .input(InputSpec::new("items").buffer().required())
            .output(OutputSpec::new("count"))
            .handler(sync_handler(calls, |mut node| {
                let count = node.get("items").and_then(Value::as_array).map_or(0, Vec::len);
                node.set("count", count as i64);
                Ok(node)
            })),
    );

    let emit_calls = calls.clone();
    registry.register(
        NodeType::new("test.emit")
            .input(InputSpec::new("times").with_default(3i64))
            .input(InputSpec::new("start").with_default(1i64))
            .input(InputSpec::new("interval_ms").with_default(0i64))
            .output(OutputSpec::new("output"))
            .handler(handler_fn(move |node, _ctx| {
                emit_calls.record(&node.id);
                let number = |key: &str| node.get(key).and_then(Value::as_f64).unwrap_or(0.0) as i64;
                let (times, start) = (number("times"), number("start"));
                let interval = Duration::from_millis(number("interval_ms").max(0) as u64);
                let emissions = stream::iter(start..start + times).then(move |i| {
                    let snapshot = node.clone().with_field("output", i);
                    async move {
                        if !interval.is_zero() {
                            tokio::time::sleep(interval).await;
                        }
                        Ok::<_, NodeError>(snapshot)
                    }
                });
                Ok(ResultProducer::from_stream(emissions))
            })),
    );

    let pair_calls = calls.clone();
    registry.register(
        NodeType::new("test.pair")
            .input(InputSpec::new("left").required())
            .input(InputSpec::new("right").required())
            .output(OutputSpec::new("output"))
            .handler(sync_handler(calls, move |mut node| {
                let pair = Value::Array(vec![
                    node.get("left").cloned().unwrap_or_default(),
                    node.get("right").cloned().unwrap_or_default(),
                ]);
                pair_calls.log(&node.id, pair.clone());
                node.set("output", pair);
                Ok(node)
            })),
    );
    registry.register(
        NodeType::new("test.gather")
            .input(InputSpec::new("items").multi().required())
            .output(OutputSpec::new("output"))
            .handler(sync_handler(calls, copy("items", "output"))),
    );
    registry.register(
        NodeType::new("test.flatten")
            .input(InputSpec::new("items").multi().buffer())
            .output(OutputSpec::new("output"))
            .handler(sync_handler(calls, copy("items", "output"))),
    );
    registry.register(
        NodeType::new("test.optional")
            .input(InputSpec::new("value").required())
            .input(InputSpec::new("extra"))
            .output(OutputSpec::new("output"))
            .handler(sync_handler(calls, copy("value", "output"))),
    );

    registry.register(
        NodeType::new("test.branch")
            .input(InputSpec::new("flag").with_default(false))
            .output(OutputSpec::new("yes").router())
            .output(OutputSpec::new("no").router())
            .handler(sync_handler(calls, |mut node| {
                let flag = node.get("flag").and_then(Value::as_bool).unwrap_or(false);
                node.set(if flag { "yes" } else { "no" }, true);
                Ok(node)
            })),
    );

    let sleep_calls = calls.clone();
    registry.register(
        NodeType::new("test.sleep")
            .input(InputSpec::new("ms").with_default(100i64))
            .output(OutputSpec::new("output"))
            .handler(handler_fn(move |mut node, ctx| {
                sleep_calls.record(&node.id);
                let ms = node.get("ms").and_then(Value::as_f64).unwrap_or(0.0) as u64;
                Ok(ResultProducer::from_future(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                        _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
                    }
                    node.set("output", "slept");
                    Ok(node)
                }))
            })),
    );

    registry.register(
        NodeType::new("test.fail")
            .input(InputSpec::new("input"))
            .output(OutputSpec::new("output"))
            .handler(sync_handler(calls, failing(NodeError::failed("boom")))),
    );
    registry.register(
        NodeType::new("test.retry")
            .output(OutputSpec::new("output"))
            .error_policy(ErrorPolicy::retry(2, 5000, 1.0))
            .handler(sync_handler(calls, failing(NodeError::failed("flaky")))),
    );
    registry.register(
        NodeType::new("test.fatal")
            .output(OutputSpec::new("output"))
            .error_policy(ErrorPolicy::retry(5, 10, 2.0))
            .handler(sync_handler(calls, failing(NodeError::non_retryable("fatal")))),
    );
    registry.register(
        NodeType::new("test.skip")
            .output(OutputSpec::new("output"))
            .error_policy(ErrorPolicy::with_strategy(ErrorStrategy::Skip))
            .handler(sync_handler(calls, failing(NodeError::failed("ignored")))),
    );
    registry.register(
        NodeType::new("test.abort")
            .output(OutputSpec::new("output"))
            .error_policy(ErrorPolicy::with_strategy(ErrorStrategy::Abort))
            .handler(sync_handler(calls, failing(NodeError::failed("stop everything")))),
    );
    registry.register(
        NodeType::new("test.panic")
            .output(OutputSpec::new("output"))
            .handler(sync_handler(calls, |_| panic!("handler blew up"))),
    );

    registry
}

pub fn node(id: &str, node_type: &str) -> NodeInstance {
    NodeInstance::new(id, node_type)
}

pub fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn numbers(value: Option<&Value>) -> Vec<f64> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

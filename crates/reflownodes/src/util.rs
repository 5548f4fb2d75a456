//! Wiring helpers: constants, fan-in, fan-out, routing and forced failure.

use futures::stream::{self, StreamExt};
use reflowcore::{
    InputSpec, NodeContext, NodeError, NodeHandler, NodeInstance, OutputSpec, ResultProducer, Value,
};
use reflowruntime::NodeType;
use tokio::time::{sleep, Duration};

/// Outputs its `value` field unchanged
pub struct ConstantNode;

impl ConstantNode {
    pub fn node_type() -> NodeType {
        NodeType::new("util.constant")
            .description("Emit a fixed value")
            .category("util")
            .input(InputSpec::new("value"))
            .output(OutputSpec::new("output"))
            .handler(ConstantNode)
    }
}

impl NodeHandler for ConstantNode {
    fn execute(&self, mut node: NodeInstance, _ctx: NodeContext) -> Result<ResultProducer, NodeError> {
        let value = node.get("value").cloned().unwrap_or_default();
        node.set("output", value);
        Ok(ResultProducer::from_value(node))
    }
}

/// Gathers one value per incoming edge into `items`
pub struct CollectNode;

impl CollectNode {
    pub fn node_type() -> NodeType {
        NodeType::new("util.collect")
            .description("Collect values from every incoming edge")
            .category("util")
            .input(InputSpec::new("items").multi().with_default(Value::Array(Vec::new())))
            .output(OutputSpec::new("output"))
            .handler(CollectNode)
    }
}

impl NodeHandler for CollectNode {
    fn execute(&self, mut node: NodeInstance, _ctx: NodeContext) -> Result<ResultProducer, NodeError> {
        let items = node.get_or("items", Value::Array(Vec::new()));
        node.set("output", items);
        Ok(ResultProducer::from_value(node))
    }
}

/// Waits for upstream completion and reports every value it emitted
pub struct BufferNode;

impl BufferNode {
    pub fn node_type() -> NodeType {
        NodeType::new("util.buffer")
            .description("Buffer all upstream emissions into one array")
            .category("util")
            .input(InputSpec::new("items").buffer().required())
            .output(OutputSpec::new("output"))
            .output(OutputSpec::new("count"))
            .handler(BufferNode)
    }
}

impl NodeHandler for BufferNode {
    fn execute(&self, mut node: NodeInstance, _ctx: NodeContext) -> Result<ResultProducer, NodeError> {
        let items = node.require_input("items")?.clone().into_items();
        node.set("count", items.len() as i64);
        node.set("output", Value::Array(items));
        Ok(ResultProducer::from_value(node))
    }
}

/// Emits each element of `items` as a separate `output`
pub struct EmitNode;

impl EmitNode {
    pub fn node_type() -> NodeType {
        NodeType::new("util.emit")
            .description("Emit array items one at a time")
            .category("util")
            .input(InputSpec::new("items").required())
            .input(InputSpec::new("interval_ms").with_default(0i64))
            .output(OutputSpec::new("output"))
            .handler(EmitNode)
    }
}

impl NodeHandler for EmitNode {
    fn execute(&self, node: NodeInstance, _ctx: NodeContext) -> Result<ResultProducer, NodeError> {
        let items = node.require_input("items")?.clone().into_items();
        let interval = node
            .get("interval_ms")
            .and_then(|v| v.as_f64())
            .map_or(Duration::ZERO, |ms| Duration::from_millis(ms.max(0.0) as u64));

        tracing::debug!("Node {} emitting {} items every {:?}", node.id, items.len(), interval);

        let emissions = stream::iter(items).then(move |item| {
            let mut snapshot = node.clone();
            snapshot.set("output", item);
            async move {
                if !interval.is_zero() {
                    sleep(interval).await;
                }
                Ok::<_, NodeError>(snapshot)
            }
        });
        Ok(ResultProducer::from_stream(emissions))
    }
}

/// Routes `value` to the `then` or `else` output depending on `condition`
pub struct BranchNode;

impl BranchNode {
    pub fn node_type() -> NodeType {
        NodeType::new("util.branch")
            .description("Route a value on a boolean condition")
            .category("util")
            .input(InputSpec::new("value"))
            .input(InputSpec::new("condition").with_default(false))
            .output(OutputSpec::new("then").router())
            .output(OutputSpec::new("else").router())
            .handler(BranchNode)
    }
}

impl NodeHandler for BranchNode {
    fn execute(&self, mut node: NodeInstance, _ctx: NodeContext) -> Result<ResultProducer, NodeError> {
        let condition = match node.get("condition") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(NodeError::InvalidInputType {
                    field: "condition".to_string(),
                    expected: "boolean".to_string(),
                    actual: format!("{:?}", other),
                })
            }
        };
        // unset `value` still routes, as `true`
        let value = node.get_or("value", Value::Bool(true));
        node.set(if condition { "then" } else { "else" }, value);
        Ok(ResultProducer::from_value(node))
    }
}

/// Always fails with `message`
pub struct FailNode;

impl FailNode {
    pub fn node_type() -> NodeType {
        NodeType::new("util.fail")
            .description("Fail with the given message")
            .category("util")
            .input(InputSpec::new("message").with_default("failed"))
            .input(InputSpec::new("retryable").with_default(true))
            .output(OutputSpec::new("output"))
            .handler(FailNode)
    }
}

impl NodeHandler for FailNode {
    fn execute(&self, node: NodeInstance, _ctx: NodeContext) -> Result<ResultProducer, NodeError> {
        let message = node.get("message").and_then(|v| v.as_str()).unwrap_or("failed");
        if node.get("retryable").and_then(|v| v.as_bool()).unwrap_or(true) {
            Err(NodeError::failed(message))
        } else {
            Err(NodeError::non_retryable(message))
        }
    }
}

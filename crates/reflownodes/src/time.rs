use async_trait::async_trait;
use reflowcore::{AsyncNodeHandler, InputSpec, NodeContext, NodeError, NodeInstance, OutputSpec};
use reflowruntime::NodeType;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration, passing `value` through
pub struct DelayNode;

impl DelayNode {
    pub fn node_type() -> NodeType {
        NodeType::new("time.delay")
            .description("Delay execution for specified milliseconds")
            .category("time")
            .input(InputSpec::new("value"))
            .input(InputSpec::new("delay_ms").with_default(1000i64))
            .output(OutputSpec::new("value"))
            .async_handler(DelayNode)
    }
}

#[async_trait]
impl AsyncNodeHandler for DelayNode {
    async fn execute(&self, mut node: NodeInstance, ctx: NodeContext) -> Result<NodeInstance, NodeError> {
        let delay_ms = node
            .get("delay_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(1000.0)
            .max(0.0) as u64;

        tracing::debug!("Node {} delaying for {}ms", node.id, delay_ms);
        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        let value = node.get("value").cloned().unwrap_or_default();
        node.set("value", value);
        Ok(node)
    }
}

use async_trait::async_trait;
use reflowcore::{AsyncNodeHandler, InputSpec, NodeContext, NodeError, NodeInstance, OutputSpec};
use reflowruntime::NodeType;

/// Simple debug node that logs its inputs
pub struct DebugNode;

impl DebugNode {
    pub fn node_type() -> NodeType {
        NodeType::new("debug.log")
            .description("Logs input values for debugging")
            .category("debug")
            .input(InputSpec::new("message"))
            .input(InputSpec::new("value"))
            .output(OutputSpec::new("message"))
            .output(OutputSpec::new("value"))
            .async_handler(DebugNode)
    }
}

#[async_trait]
impl AsyncNodeHandler for DebugNode {
    async fn execute(&self, mut node: NodeInstance, ctx: NodeContext) -> Result<NodeInstance, NodeError> {
        let message = node
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        ctx.events.info(format!("DEBUG: {}", message));

        let value = node.get("value").cloned().unwrap_or_default();
        if !value.is_null() {
            let rendered = serde_json::to_string(&serde_json::Value::from(value.clone()))
                .unwrap_or_else(|_| format!("{:?}", value));
            ctx.events.info(format!("  value: {}", rendered));
        }

        node.set("message", message);
        node.set("value", value);
        Ok(node)
    }
}

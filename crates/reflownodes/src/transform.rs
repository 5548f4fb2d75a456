use async_trait::async_trait;
use reflowcore::{AsyncNodeHandler, InputSpec, NodeContext, NodeError, NodeInstance, OutputSpec, Value};
use reflowruntime::NodeType;

/// Parse JSON string to Value
pub struct JsonParseNode;

impl JsonParseNode {
    pub fn node_type() -> NodeType {
        NodeType::new("transform.json_parse")
            .description("Parse JSON string")
            .category("transform")
            .input(InputSpec::new("json").required())
            .output(OutputSpec::new("parsed"))
            .async_handler(JsonParseNode)
    }
}

#[async_trait]
impl AsyncNodeHandler for JsonParseNode {
    async fn execute(&self, mut node: NodeInstance, _ctx: NodeContext) -> Result<NodeInstance, NodeError> {
        let parsed: serde_json::Value = serde_json::from_str(node.require_str("json")?)
            .map_err(|e| NodeError::non_retryable(format!("JSON parse error: {}", e)))?;

        node.set("parsed", Value::from(parsed));
        Ok(node)
    }
}

/// Stringify Value to JSON
pub struct JsonStringifyNode;

impl JsonStringifyNode {
    pub fn node_type() -> NodeType {
        NodeType::new("transform.json_stringify")
            .description("Convert value to JSON string")
            .category("transform")
            .input(InputSpec::new("value").required())
            .input(InputSpec::new("pretty").with_default(false))
            .output(OutputSpec::new("json"))
            .async_handler(JsonStringifyNode)
    }
}

#[async_trait]
impl AsyncNodeHandler for JsonStringifyNode {
    async fn execute(&self, mut node: NodeInstance, _ctx: NodeContext) -> Result<NodeInstance, NodeError> {
        let value = serde_json::Value::from(node.require_input("value")?.clone());
        let pretty = node.get("pretty").and_then(|v| v.as_bool()).unwrap_or(false);

        let json_str = if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        node.set("json", json_str);
        Ok(node)
    }
}

//! Standard node library
//!
//! Collection of generic node types for wiring and exercising workflows

mod debug;
mod time;
mod transform;
mod util;

pub use debug::DebugNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};
pub use util::{BranchNode, BufferNode, CollectNode, ConstantNode, EmitNode, FailNode};

use reflowruntime::NodeRegistry;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(util::ConstantNode::node_type());
    registry.register(util::CollectNode::node_type());
    registry.register(util::BufferNode::node_type());
    registry.register(util::EmitNode::node_type());
    registry.register(util::BranchNode::node_type());
    registry.register(util::FailNode::node_type());
    registry.register(debug::DebugNode::node_type());
    registry.register(time::DelayNode::node_type());
    registry.register(transform::JsonParseNode::node_type());
    registry.register(transform::JsonStringifyNode::node_type());
}

mod bus;
mod projection;

pub use bus::{EventBus, EventEmitter, EventKind, EventSubscription, ExecutionId, FlowEvent};
pub use projection::{apply_event, apply_snapshot, WorkflowProgress};

//! One node execution: dispatch, emission bookkeeping and the node type's
//! error policy, expressed as a stream of node snapshots.

use crate::dispatch::dispatch;
use crate::policy::{decide, AbortSignal, Decision};
use crate::registry::NodeRegistry;
use async_stream::stream;
use futures::stream::{self, BoxStream, StreamExt};
use reflowcore::{
    EventBus, ExecutionId, NodeContext, NodeError, NodeInstance, NodeState, SerializedError,
    WorkflowId,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a node execution needs from the run it belongs to
#[derive(Clone)]
pub struct ExecutionEnv {
    pub registry: Arc<NodeRegistry>,
    pub events: Arc<EventBus>,
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub cancellation: CancellationToken,
    pub abort: Arc<AbortSignal>,
}

impl ExecutionEnv {
    fn context(&self, node: &NodeInstance, attempt: u32) -> NodeContext {
        let emitter = self.events.create_emitter(
            self.workflow_id.clone(),
            self.execution_id,
            node.id.clone(),
        );
        let mut ctx = NodeContext::new(emitter).with_cancellation(self.cancellation.child_token());
        ctx.attempt = attempt;
        ctx
    }
}

/// Shared completed-execution counter of one node, seeded with its count
/// before the run
pub fn counter(node: &NodeInstance) -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(node.count))
}

/// Run `node` once (plus retries) and stream its snapshots.
///
/// Yields `running`, then every handler emission (all but the last as
/// `emitting`, the last as `success`), or a terminal `fail`. Failures never
/// end the stream with an error.
pub fn execute_node(
    env: ExecutionEnv,
    node: NodeInstance,
    completed: Arc<AtomicU32>,
) -> BoxStream<'static, NodeInstance> {
    let policy = node
        .meta()
        .map(|m| m.error_policy.clone())
        .unwrap_or_default();
    let handler = env.registry.handler(&node.node_type);

    stream! {
        let mut attempt = 0u32;
        loop {
            let mut running = node.fresh_copy();
            running.state = NodeState::Running;
            running.emit_count = 0;
            running.error = None;
            running.skipped = false;
            yield running.clone();

            let mut emissions = match &handler {
                Some(handler) => dispatch(handler.as_ref(), running.clone(), env.context(&node, attempt)),
                None => stream::once(futures::future::ready(Err(NodeError::Configuration(format!(
                    "no handler registered for node type {}",
                    node.node_type
                )))))
                .boxed(),
            };

            let mut held: Option<NodeInstance> = None;
            let mut emitted = 0u32;
            let mut failure: Option<NodeError> = None;

            while let Some(item) = emissions.next().await {
                match item {
                    Ok(mut snapshot) => {
                        if let Some(mut previous) = held.take() {
                            previous.state = NodeState::Emitting;
                            yield previous;
                        }
                        emitted += 1;
                        snapshot.id = node.id.clone();
                        snapshot.count = running.count;
                        snapshot.emit_count = emitted;
                        snapshot.error = None;
                        snapshot.skipped = false;
                        held = Some(snapshot);
                    }
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            }

            let Some(error) = failure else {
                let mut done = held.unwrap_or(running);
                done.state = NodeState::Success;
                done.count = completed.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!("Node {} completed ({} emissions)", node.id, done.emit_count);
                yield done;
                break;
            };

            if let Some(mut previous) = held.take() {
                previous.state = NodeState::Emitting;
                yield previous;
            }

            match decide(&policy, &error, attempt) {
                Decision::Retry(delay) => {
                    tracing::warn!(
                        "Node {} failed on attempt {}: {}; retrying in {:?}",
                        node.id, attempt + 1, error, delay
                    );
                    let cancelled = tokio::select! {
                        _ = tokio::time::sleep(delay) => false,
                        _ = env.cancellation.cancelled() => true,
                    };
                    if cancelled {
                        yield failed(&running, &NodeError::Cancelled);
                        break;
                    }
                    attempt += 1;
                }
                Decision::Skip => {
                    tracing::warn!("Node {} failed and was skipped: {}", node.id, error);
                    let mut skipped = running;
                    skipped.state = NodeState::Success;
                    skipped.skipped = true;
                    skipped.emit_count = 0;
                    skipped.error = Some(SerializedError::from(&error));
                    skipped.count = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    yield skipped;
                    break;
                }
                Decision::Fail => {
                    tracing::error!("Node {} failed: {}", node.id, error);
                    yield failed(&running, &error);
                    break;
                }
                Decision::Abort => {
                    tracing::error!("Node {} failed, aborting workflow: {}", node.id, error);
                    let snapshot = failed(&running, &error);
                    env.abort.trigger(snapshot.clone());
                    yield snapshot;
                    break;
                }
            }
        }
    }
    .boxed()
}

fn failed(running: &NodeInstance, error: &NodeError) -> NodeInstance {
    let mut snapshot = running.clone();
    snapshot.state = NodeState::Fail;
    snapshot.error = Some(SerializedError::from(error));
    snapshot
}

use reflowcore::{ErrorPolicy, ErrorStrategy, NodeError, NodeInstance};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What to do with one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry(Duration),
    Skip,
    Fail,
    Abort,
}

/// Decide the outcome of failed attempt number `attempt` (0-based).
///
/// Non-retryable errors bypass the retry strategy and fail at once.
pub fn decide(policy: &ErrorPolicy, error: &NodeError, attempt: u32) -> Decision {
    match policy.strategy {
        ErrorStrategy::Retry if error.is_retryable() && attempt < policy.max_retries => {
            Decision::Retry(policy.delay_for_attempt(attempt))
        }
        ErrorStrategy::Retry | ErrorStrategy::Fail => Decision::Fail,
        ErrorStrategy::Skip => Decision::Skip,
        ErrorStrategy::Abort => Decision::Abort,
    }
}

/// Workflow-wide abort raised by a node with the `abort` strategy.
///
/// Triggering cancels the execution's root token and records the failing
/// snapshot so the final state can be folded in even if the snapshot stream
/// is no longer being consumed.
pub struct AbortSignal {
    token: CancellationToken,
    snapshot: Mutex<Option<NodeInstance>>,
}

impl AbortSignal {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            snapshot: Mutex::new(None),
        }
    }

    pub fn trigger(&self, snapshot: NodeInstance) {
        if let Ok(mut slot) = self.snapshot.lock() {
            if slot.is_none() {
                *slot = Some(snapshot);
            }
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.snapshot.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn take_snapshot(&self) -> Option<NodeInstance> {
        self.snapshot.lock().ok().and_then(|mut s| s.take())
    }
}

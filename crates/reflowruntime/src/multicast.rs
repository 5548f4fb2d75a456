//! Hot, replaying multicast over one node execution stream.
//!
//! The source is driven by a single task started on the first poll of any
//! subscriber. Every item is kept for the rest of the run, so a subscriber
//! attached late still observes the full emission sequence in order.

use futures::stream::{self, BoxStream, StreamExt};
use reflowcore::{NodeId, NodeInstance};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Replay {
    items: Vec<NodeInstance>,
    complete: bool,
}

struct Inner {
    node_id: NodeId,
    sender: Arc<watch::Sender<Replay>>,
    source: Mutex<Option<BoxStream<'static, NodeInstance>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Marks the replay complete when the driver ends, panics included
struct CompleteOnDrop(Arc<watch::Sender<Replay>>);

impl Drop for CompleteOnDrop {
    fn drop(&mut self) {
        self.0.send_modify(|replay| replay.complete = true);
    }
}

impl Inner {
    fn start(&self) {
        let source = match self.source.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(mut source) = source else {
            return;
        };

        tracing::debug!("Starting node stream {}", self.node_id);
        let sender = Arc::clone(&self.sender);
        let handle = tokio::spawn(async move {
            let _complete = CompleteOnDrop(Arc::clone(&sender));
            while let Some(item) = source.next().await {
                sender.send_modify(|replay| replay.items.push(item));
            }
        });
        if let Ok(mut driver) = self.driver.lock() {
            *driver = Some(handle);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut driver) = self.driver.lock() {
            if let Some(handle) = driver.take() {
                handle.abort();
            }
        }
    }
}

enum Step {
    Item(NodeInstance),
    Done,
    Wait,
}

/// Shared handle on one node's execution stream
#[derive(Clone)]
pub struct SharedStream {
    inner: Arc<Inner>,
}

impl SharedStream {
    pub fn new(node_id: impl Into<NodeId>, source: BoxStream<'static, NodeInstance>) -> Self {
        let (sender, _) = watch::channel(Replay::default());
        Self {
            inner: Arc::new(Inner {
                node_id: node_id.into(),
                sender: Arc::new(sender),
                source: Mutex::new(Some(source)),
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    /// New subscriber, replaying from the first item
    pub fn subscribe(&self) -> BoxStream<'static, NodeInstance> {
        let inner = Arc::clone(&self.inner);
        let receiver = inner.sender.subscribe();

        stream::unfold((inner, receiver, 0usize), |(inner, mut receiver, position)| async move {
            inner.start();
            loop {
                let step = {
                    let replay = receiver.borrow_and_update();
                    match replay.items.get(position) {
                        Some(item) => Step::Item(item.clone()),
                        None if replay.complete => Step::Done,
                        None => Step::Wait,
                    }
                };
                match step {
                    Step::Item(item) => return Some((item, (inner, receiver, position + 1))),
                    Step::Done => return None,
                    Step::Wait => {
                        if receiver.changed().await.is_err() {
                            return None;
                        }
                    }
                }
            }
        })
        .boxed()
    }
}

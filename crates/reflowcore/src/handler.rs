//! Handler contract for node types.
//!
//! A handler may answer synchronously, with a future, or with a stream of
//! snapshots. All three are wrapped in a [`ResultProducer`] and the engine
//! only ever consumes the uniform stream it exposes.

use crate::{NodeContext, NodeError, NodeInstance};
use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;

/// Stream of handler emissions; an `Err` item ends the execution
pub type EmissionStream = BoxStream<'static, Result<NodeInstance, NodeError>>;

enum Producer {
    Value(NodeInstance),
    Future(BoxFuture<'static, Result<NodeInstance, NodeError>>),
    Stream(EmissionStream),
}

/// Uniform wrapper over the three handler return shapes
pub struct ResultProducer {
    inner: Producer,
}

impl ResultProducer {
    pub fn from_value(node: NodeInstance) -> Self {
        Self {
            inner: Producer::Value(node),
        }
    }

    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<NodeInstance, NodeError>> + Send + 'static,
    {
        Self {
            inner: Producer::Future(future.boxed()),
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<NodeInstance, NodeError>> + Send + 'static,
    {
        Self {
            inner: Producer::Stream(stream.boxed()),
        }
    }

    pub fn into_stream(self) -> EmissionStream {
        match self.inner {
            Producer::Value(node) => stream::once(future::ready(Ok(node))).boxed(),
            Producer::Future(fut) => fut.into_stream().boxed(),
            Producer::Stream(s) => s,
        }
    }
}

/// Core trait that every node type's handler implements.
///
/// Returning `Err` is the synchronous-failure path; it is treated exactly
/// like a rejected future or an errored stream.
pub trait NodeHandler: Send + Sync {
    fn execute(&self, node: NodeInstance, ctx: NodeContext) -> Result<ResultProducer, NodeError>;
}

/// Single-shot async handler
#[async_trait]
pub trait AsyncNodeHandler: Send + Sync + 'static {
    async fn execute(&self, node: NodeInstance, ctx: NodeContext) -> Result<NodeInstance, NodeError>;
}

/// Adapts an [`AsyncNodeHandler`] to the [`NodeHandler`] contract
pub struct AsyncHandler<H>(Arc<H>);

impl<H: AsyncNodeHandler> AsyncHandler<H> {
    pub fn new(handler: H) -> Self {
        Self(Arc::new(handler))
    }
}

impl<H: AsyncNodeHandler> NodeHandler for AsyncHandler<H> {
    fn execute(&self, node: NodeInstance, ctx: NodeContext) -> Result<ResultProducer, NodeError> {
        let handler = Arc::clone(&self.0);
        Ok(ResultProducer::from_future(async move {
            handler.execute(node, ctx).await
        }))
    }
}

/// Closure-backed handler
pub struct FnHandler<F>(F);

impl<F> NodeHandler for FnHandler<F>
where
    F: Fn(NodeInstance, NodeContext) -> Result<ResultProducer, NodeError> + Send + Sync,
{
    fn execute(&self, node: NodeInstance, ctx: NodeContext) -> Result<ResultProducer, NodeError> {
        (self.0)(node, ctx)
    }
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(NodeInstance, NodeContext) -> Result<ResultProducer, NodeError> + Send + Sync,
{
    FnHandler(f)
}

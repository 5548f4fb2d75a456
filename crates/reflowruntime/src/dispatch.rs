use futures::stream::{self, StreamExt};
use reflowcore::{EmissionStream, NodeContext, NodeError, NodeHandler, NodeInstance};
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Invoke a handler and normalize its answer into one emission stream.
///
/// A synchronous `Err`, a panic in `execute`, a rejected future and an
/// errored or panicking stream all surface as an `Err` item.
pub fn dispatch(handler: &dyn NodeHandler, node: NodeInstance, ctx: NodeContext) -> EmissionStream {
    let produced = std::panic::catch_unwind(AssertUnwindSafe(|| handler.execute(node, ctx)));
    match produced {
        Ok(Ok(producer)) => AssertUnwindSafe(producer.into_stream())
            .catch_unwind()
            .map(|item| item.unwrap_or_else(|panic| Err(panicked(panic))))
            .boxed(),
        Ok(Err(error)) => stream::once(async move { Err(error) }).boxed(),
        Err(panic) => stream::once(async move { Err(panicked(panic)) }).boxed(),
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> NodeError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    NodeError::failed(format!("handler panicked: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflowcore::{handler_fn, EventBus, ResultProducer};
    use uuid::Uuid;

    fn ctx() -> NodeContext {
        let bus = EventBus::default();
        NodeContext::new(bus.create_emitter("wf".into(), Uuid::new_v4(), "n".into()))
    }

    #[tokio::test]
    async fn synchronous_errors_become_items() {
        let handler = handler_fn(|_, _| Err(NodeError::failed("sync")));
        let items: Vec<_> = dispatch(&handler, NodeInstance::new("n", "t"), ctx()).collect().await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().err(), Some(&NodeError::failed("sync")));
    }

    #[tokio::test]
    async fn panics_become_execution_failures() {
        let handler = handler_fn(|_, _| -> Result<ResultProducer, NodeError> { panic!("kaboom") });
        let items: Vec<_> = dispatch(&handler, NodeInstance::new("n", "t"), ctx()).collect().await;

        assert!(matches!(&items[0], Err(NodeError::ExecutionFailed(m)) if m.contains("kaboom")));
    }

    #[tokio::test]
    async fn stream_handlers_pass_through() {
        let handler = handler_fn(|node, _| {
            Ok(ResultProducer::from_stream(stream::iter(vec![
                Ok(node.clone()),
                Ok(node),
                Err(NodeError::failed("late")),
            ])))
        });
        let items: Vec<_> = dispatch(&handler, NodeInstance::new("n", "t"), ctx()).collect().await;

        assert_eq!(items.len(), 3);
        assert!(items[2].is_err());
    }
}

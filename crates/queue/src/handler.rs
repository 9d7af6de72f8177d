//! Task handler trait.

use std::future::Future;

use async_trait::async_trait;
use matchwatch_common::BoxError;

use crate::task::Payload;

/// Executes one task type.
///
/// Any error (or panic) is treated as a retryable failure by the queue.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the task and return its result payload.
    async fn handle(&self, payload: Payload) -> Result<Payload, BoxError>;
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, BoxError>> + Send + 'static,
{
    async fn handle(&self, payload: Payload) -> Result<Payload, BoxError> {
        (self)(payload).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn handle(&self, payload: Payload) -> Result<Payload, BoxError> {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let handler: Arc<dyn TaskHandler> = Arc::new(|payload: Payload| async move {
            let mut out = Payload::new();
            out.insert("seen".to_string(), payload.len().into());
            Ok::<_, BoxError>(out)
        });

        let mut payload = Payload::new();
        payload.insert("a".to_string(), 1.into());
        let result = handler.handle(payload).await.unwrap();
        assert_eq!(result["seen"], 1);
    }

    #[tokio::test]
    async fn test_struct_handler() {
        let handler: Arc<dyn TaskHandler> = Arc::new(Echo);
        let mut payload = Payload::new();
        payload.insert("k".to_string(), "v".into());
        assert_eq!(handler.handle(payload.clone()).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_failing_handler() {
        let handler = |_: Payload| async move { Err::<Payload, BoxError>("boom".into()) };
        let err = handler.handle(Payload::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}

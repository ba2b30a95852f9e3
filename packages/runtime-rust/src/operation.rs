//! The contract every unit of asynchronous work implements.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use callflow_core::OperationError;
use futures_util::future::BoxFuture;

use crate::cancel::CancellationToken;

/// Boxed future returned by argument-taking operations.
pub type OperationFuture<T> = BoxFuture<'static, Result<T, OperationError>>;

// ---------------------------------------------------------------------------
// Operation trait
// ---------------------------------------------------------------------------

/// A cancellable unit of asynchronous work.
///
/// The operation receives the token of the current attempt. It should stop
/// early once the token is cancelled and report that as
/// [`OperationError::Cancelled`]; the executor also drops the attempt's future
/// as soon as the token fires.
///
/// Any `Fn(CancellationToken) -> impl Future<Output = Result<T, OperationError>>`
/// is an operation.
#[async_trait]
pub trait Operation: Send + Sync {
    type Output: Send + 'static;

    async fn run(&self, token: CancellationToken) -> Result<Self::Output, OperationError>;
}

#[async_trait]
impl<F, Fut, T> Operation for F
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn run(&self, token: CancellationToken) -> Result<T, OperationError> {
        (self)(token).await
    }
}

// ---------------------------------------------------------------------------
// ArgOperation / BoundOperation
// ---------------------------------------------------------------------------

/// An operation that takes per-call arguments, as stored by the sessions.
pub struct ArgOperation<A, T> {
    f: Arc<dyn Fn(A, CancellationToken) -> OperationFuture<T> + Send + Sync>,
}

impl<A: 'static, T: 'static> ArgOperation<A, T> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(A, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |args, token| Box::pin(f(args, token))),
        }
    }

    /// Fixes the arguments, producing a retryable [`Operation`].
    #[must_use]
    pub fn bind(&self, args: A) -> BoundOperation<A, T> {
        BoundOperation {
            op: self.clone(),
            args,
        }
    }
}

impl<A, T> Clone for ArgOperation<A, T> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

/// An [`ArgOperation`] with its arguments fixed. Each attempt receives a
/// clone of the arguments.
pub struct BoundOperation<A, T> {
    op: ArgOperation<A, T>,
    args: A,
}

#[async_trait]
impl<A, T> Operation for BoundOperation<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn run(&self, token: CancellationToken) -> Result<T, OperationError> {
        (self.op.f)(self.args.clone(), token).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn closures_are_operations() {
        let op = |token: CancellationToken| async move {
            token.check()?;
            Ok::<_, OperationError>(5)
        };
        assert_eq!(op.run(CancellationToken::new()).await, Ok(5));

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(op.run(cancelled).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn bound_operation_reuses_arguments() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = {
            let calls = Arc::clone(&calls);
            ArgOperation::new(move |visitor: String, _token| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(format!("badge for {visitor}")) }
            })
        };

        let bound = op.bind("ada".to_string());
        assert_eq!(bound.run(CancellationToken::new()).await.unwrap(), "badge for ada");
        assert_eq!(bound.run(CancellationToken::new()).await.unwrap(), "badge for ada");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

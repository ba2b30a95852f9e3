//! Optimistic session: shows a guessed value while the operation that
//! confirms it is in flight, and rolls back if it fails.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use callflow_core::{CancelReason, ExecutionOutcome, OptimisticState};
use tokio::sync::watch;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use super::FlagGuard;
use crate::cancel::SessionScope;
use crate::error::SessionError;
use crate::executor::{ExecuteOptions, Executor};
use crate::operation::ArgOperation;

/// Session that applies a value before the server confirms it.
///
/// At most one optimistic call is in flight per session; a second one is
/// rejected with [`SessionError::Busy`] instead of racing the first on
/// rollback.
///
/// Disposing freezes the state. A call in flight at that point settles as
/// cancelled without rolling back, so the state may still show
/// `is_optimistic` with its `pending` guess. Observers of a disposed session
/// should not read that as a call in progress.
pub struct OptimisticSession<P, T> {
    id: Uuid,
    executor: Executor,
    op: ArgOperation<P, T>,
    options: ExecuteOptions<T>,
    scope: SessionScope,
    state: watch::Sender<OptimisticState<T>>,
    busy: Arc<AtomicBool>,
}

impl<P, T> OptimisticSession<P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Session using the executor's default options.
    pub fn new(executor: &Executor, op: ArgOperation<P, T>) -> Self {
        Self::with_options(executor, op, executor.default_options().named("optimistic"))
    }

    /// Session whose calls run with `options`.
    pub fn with_options(executor: &Executor, op: ArgOperation<P, T>, options: ExecuteOptions<T>) -> Self {
        let (state, _) = watch::channel(OptimisticState::default());
        Self {
            id: Uuid::new_v4(),
            executor: executor.clone(),
            op,
            options,
            scope: SessionScope::child_of(executor.root_token()),
            state,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identifier carried in this session's log spans.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Shows `optimistic` until the operation run with `params` settles.
    ///
    /// On success the confirmed value becomes what the operation returned,
    /// which may differ from the guess. On failure or cancellation the
    /// confirmed value from before the call is restored.
    ///
    /// # Errors
    ///
    /// [`SessionError::Busy`] while another optimistic call is in flight,
    /// [`SessionError::Failed`] or [`SessionError::Cancelled`] when the
    /// operation did not confirm, [`SessionError::Disposed`] on a disposed
    /// session.
    pub async fn execute_optimistic(
        &self,
        optimistic: T,
        params: P,
        options: Option<ExecuteOptions<T>>,
    ) -> Result<T, SessionError> {
        if !self.scope.is_alive() {
            return Err(SessionError::Disposed);
        }
        let Some(_busy) = FlagGuard::try_claim(&self.busy) else {
            debug!(session_id = %self.id, "optimistic call rejected, another is in flight");
            return Err(SessionError::Busy);
        };

        let mut original = None;
        self.state.send_modify(|s| {
            original = s.confirmed.clone();
            s.pending = Some(optimistic);
            s.is_optimistic = true;
            s.error = None;
        });

        let ticket = self.scope.begin();
        let options = options
            .unwrap_or_else(|| self.options.clone())
            .with_cancellation(ticket.token().clone());
        let span = info_span!("optimistic_session", session_id = %self.id);
        let outcome = self
            .executor
            .execute(&self.op.bind(params), options)
            .instrument(span)
            .await;
        self.scope.finish(&ticket);

        let reset = matches!(
            ticket.token().reason(),
            Some(CancelReason::Reset | CancelReason::Disposed)
        );
        let result = match outcome {
            ExecutionOutcome::Success { value, .. } => Ok(value),
            ExecutionOutcome::Failure {
                error,
                kind,
                attempts,
            } => Err(SessionError::Failed {
                source: error,
                kind,
                attempts,
            }),
            ExecutionOutcome::Cancelled { reason, .. } => Err(SessionError::Cancelled { reason }),
        };

        // After a reset the state already belongs to no call.
        if !reset {
            self.state.send_modify(|s| {
                match &result {
                    Ok(value) => {
                        s.confirmed = Some(value.clone());
                        s.error = None;
                    }
                    Err(err) => {
                        s.confirmed = original;
                        s.error = err.operation_error().cloned();
                    }
                }
                s.pending = None;
                s.is_optimistic = false;
            });
        }
        result
    }

    /// Sets the confirmed value directly, e.g. from a push update.
    pub fn update_data(&self, value: T) {
        self.state.send_modify(|s| {
            s.confirmed = Some(value);
            s.error = None;
        });
    }

    /// Cancels an in-flight call and clears the state.
    pub fn reset(&self) {
        self.scope.cancel_current(CancelReason::Reset);
        self.state.send_replace(OptimisticState::default());
    }

    /// The value to display: pending while optimistic, else confirmed.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.state.borrow().value().cloned()
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> OptimisticState<T> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<OptimisticState<T>> {
        self.state.subscribe()
    }

    /// Cancels an in-flight call and refuses further ones. The state is
    /// left as it was.
    pub fn dispose(&self) {
        self.scope.dispose();
    }
}

impl<P, T> Drop for OptimisticSession<P, T> {
    fn drop(&mut self) {
        self.scope.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use callflow_core::{AlertKind, OperationError};

    use super::*;
    use crate::cancel::CancellationToken;
    use crate::testing::Harness;

    /// Saves a visitor name after `delay`; the server upper-cases it.
    /// Names starting with `!` are rejected.
    fn save_name(delay: Duration) -> ArgOperation<String, String> {
        ArgOperation::new(move |name: String, _token: CancellationToken| async move {
            tokio::time::sleep(delay).await;
            if name.starts_with('!') {
                Err(OperationError::status(409, "name taken"))
            } else {
                Ok(name.to_uppercase())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn success_confirms_the_server_value() {
        let h = Harness::new();
        let session = Arc::new(OptimisticSession::new(&h.executor, save_name(Duration::from_secs(1))));
        session.update_data("Ada".to_string());

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .execute_optimistic("grace".into(), "grace".into(), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let during = session.state();
        assert!(during.is_optimistic);
        assert_eq!(session.value().as_deref(), Some("grace"));
        assert_eq!(during.confirmed.as_deref(), Some("Ada"));

        assert_eq!(task.await.unwrap(), Ok("GRACE".to_string()));
        let after = session.state();
        assert!(!after.is_optimistic);
        assert_eq!(after.pending, None);
        assert_eq!(after.confirmed.as_deref(), Some("GRACE"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_restores_the_original_value() {
        let h = Harness::new();
        let session = OptimisticSession::new(&h.executor, save_name(Duration::from_millis(5)));
        session.update_data("A".to_string());

        let result = session
            .execute_optimistic("B".into(), "!B".into(), None)
            .await;

        assert!(matches!(result, Err(SessionError::Failed { .. })));
        let state = session.state();
        assert_eq!(state.confirmed.as_deref(), Some("A"));
        assert_eq!(session.value().as_deref(), Some("A"));
        assert!(!state.is_optimistic);
        assert!(state.error.is_some());
        assert_eq!(h.alerts.count_of(AlertKind::Error), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_while_in_flight_is_busy() {
        let h = Harness::new();
        let session = Arc::new(OptimisticSession::new(&h.executor, save_name(Duration::from_secs(1))));

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.execute_optimistic("x".into(), "x".into(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            session.execute_optimistic("y".into(), "y".into(), None).await,
            Err(SessionError::Busy)
        );
        assert_eq!(session.value().as_deref(), Some("x"));
        assert_eq!(first.await.unwrap(), Ok("X".to_string()));

        // The flag is released once the first call settles.
        assert_eq!(
            session.execute_optimistic("y".into(), "y".into(), None).await,
            Ok("Y".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_the_in_flight_call() {
        let h = Harness::new();
        let session = Arc::new(OptimisticSession::new(&h.executor, save_name(Duration::from_secs(1))));
        session.update_data("A".to_string());

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.execute_optimistic("B".into(), "B".into(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.reset();

        assert_eq!(
            task.await.unwrap(),
            Err(SessionError::Cancelled {
                reason: CancelReason::Reset
            })
        );
        assert_eq!(session.state(), OptimisticState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_mid_flight_freezes_the_state() {
        let h = Harness::new();
        let session = Arc::new(OptimisticSession::new(&h.executor, save_name(Duration::from_secs(1))));
        session.update_data("A".to_string());

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.execute_optimistic("B".into(), "B".into(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.dispose();

        assert_eq!(
            task.await.unwrap(),
            Err(SessionError::Cancelled {
                reason: CancelReason::Disposed
            })
        );
        let state = session.state();
        assert!(state.is_optimistic);
        assert_eq!(state.pending.as_deref(), Some("B"));
        assert_eq!(state.confirmed.as_deref(), Some("A"));
        assert_eq!(
            session.execute_optimistic("C".into(), "C".into(), None).await,
            Err(SessionError::Disposed)
        );
    }
}

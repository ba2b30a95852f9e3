//! Single-call session: owns `{data, loading, error}` for one operation.

use std::hash::Hash;
use std::sync::Arc;

use callflow_core::{CallState, CancelReason, ClockSource, SystemClock};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::settle;
use crate::cancel::SessionScope;
use crate::error::{into_session_result, SessionError};
use crate::executor::{ExecuteOptions, Executor};
use crate::operation::ArgOperation;

/// Applied to a successful result before it is stored.
pub type Transform<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// Construction options of a [`CallSession`].
pub struct CallOptions<T> {
    pub execute: ExecuteOptions<T>,
    pub transform: Option<Transform<T>>,
    pub clock: Arc<dyn ClockSource>,
}

impl<T> CallOptions<T> {
    /// Options with the executor's configured defaults.
    #[must_use]
    pub fn new(executor: &Executor) -> Self {
        Self {
            execute: executor.default_options().named("call"),
            transform: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Execution options used by every call.
    #[must_use]
    pub fn with_execute_options(mut self, execute: ExecuteOptions<T>) -> Self {
        self.execute = execute;
        self
    }

    /// Maps each successful result before it is stored.
    #[must_use]
    pub fn with_transform(mut self, f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(f));
        self
    }

    /// Clock stamped into `last_executed_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }
}

struct CallShared<A, T> {
    id: Uuid,
    executor: Executor,
    op: ArgOperation<A, T>,
    options: CallOptions<T>,
    scope: SessionScope,
    state: watch::Sender<CallState<T>>,
    last_args: Mutex<Option<A>>,
    deps: Mutex<Option<u64>>,
    hasher: ahash::RandomState,
    immediate: bool,
}

/// Runs one operation on demand and keeps the state of the latest call.
///
/// A new call supersedes one still in flight; the superseded call settles as
/// cancelled and leaves the state alone. Dropping the session disposes it.
pub struct CallSession<A, T> {
    shared: Arc<CallShared<A, T>>,
}

impl<A, T> CallSession<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Session with default call options.
    pub fn new(executor: &Executor, op: ArgOperation<A, T>) -> Self {
        Self::with_options(executor, op, CallOptions::new(executor))
    }

    /// Session with explicit options.
    pub fn with_options(executor: &Executor, op: ArgOperation<A, T>, options: CallOptions<T>) -> Self {
        Self::build(executor, op, options, false)
    }

    /// Creates the session and starts a first call with `args` in the
    /// background. Later [`CallSession::update_dependencies`] calls with a
    /// changed `deps` value start a new one.
    ///
    /// Must be called within a tokio runtime.
    pub fn immediate<D>(
        executor: &Executor,
        op: ArgOperation<A, T>,
        options: CallOptions<T>,
        deps: &D,
        args: A,
    ) -> Self
    where
        D: Hash + ?Sized,
    {
        let session = Self::build(executor, op, options, true);
        let fingerprint = session.shared.hasher.hash_one(deps);
        *session.shared.deps.lock() = Some(fingerprint);
        drop(session.spawn_call(args));
        session
    }

    fn build(
        executor: &Executor,
        op: ArgOperation<A, T>,
        options: CallOptions<T>,
        immediate: bool,
    ) -> Self {
        let (state, _) = watch::channel(CallState::default());
        Self {
            shared: Arc::new(CallShared {
                id: Uuid::new_v4(),
                executor: executor.clone(),
                op,
                options,
                scope: SessionScope::child_of(executor.root_token()),
                state,
                last_args: Mutex::new(None),
                deps: Mutex::new(None),
                hasher: ahash::RandomState::new(),
                immediate,
            }),
        }
    }

    /// Identifier carried in this session's log spans.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Runs the operation with `args`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Failed`] when the executor gives up,
    /// [`SessionError::Cancelled`] when the call is superseded, reset or
    /// cancelled, [`SessionError::Disposed`] on a disposed session.
    pub async fn call(&self, args: A) -> Result<T, SessionError> {
        self.shared.call(args).await
    }

    /// Re-runs the operation with the arguments of the last call.
    ///
    /// # Errors
    ///
    /// [`SessionError::NothingToRetry`] if no call was made since creation or
    /// the last reset, otherwise as [`CallSession::call`].
    pub async fn retry(&self) -> Result<T, SessionError> {
        let args = self
            .shared
            .last_args
            .lock()
            .clone()
            .ok_or(SessionError::NothingToRetry)?;
        self.shared.call(args).await
    }

    /// Runs [`CallSession::call`] on a background task.
    pub fn spawn_call(&self, args: A) -> JoinHandle<Result<T, SessionError>> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.call(args).await })
    }

    /// Records the dependency values of an immediate session and starts a
    /// background call with `args` when they changed. Returns whether a call
    /// was started.
    pub fn update_dependencies<D>(&self, deps: &D, args: A) -> bool
    where
        D: Hash + ?Sized,
    {
        let fingerprint = self.shared.hasher.hash_one(deps);
        let changed = self.shared.deps.lock().replace(fingerprint) != Some(fingerprint);
        if !(changed && self.shared.immediate) {
            return false;
        }
        drop(self.spawn_call(args));
        true
    }

    /// Cancels any in-flight call and clears the state.
    pub fn reset(&self) {
        self.shared.scope.cancel_current(CancelReason::Reset);
        *self.shared.last_args.lock() = None;
        self.shared.state.send_replace(CallState::default());
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> CallState<T> {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CallState<T>> {
        self.shared.state.subscribe()
    }

    /// Cancels any in-flight call. Later calls fail with
    /// [`SessionError::Disposed`].
    pub fn dispose(&self) {
        self.shared.scope.dispose();
    }
}

impl<A, T> CallShared<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    async fn call(&self, args: A) -> Result<T, SessionError> {
        if !self.scope.is_alive() {
            return Err(SessionError::Disposed);
        }
        *self.last_args.lock() = Some(args.clone());

        let ticket = self.scope.begin();
        self.state.send_modify(|s| s.loading = true);

        let options = self
            .options
            .execute
            .clone()
            .with_cancellation(ticket.token().clone());
        let span = info_span!("call_session", session_id = %self.id, generation = ticket.generation());
        let outcome = self
            .executor
            .execute(&self.op.bind(args), options)
            .instrument(span)
            .await;
        self.scope.finish(&ticket);

        let result = into_session_result(match &self.options.transform {
            Some(transform) => outcome.map(|v| transform(v)),
            None => outcome,
        });
        let now = self.options.clock.now();
        let stale = settle(&self.state, &self.scope, &ticket, |s| {
            s.last_executed_at = Some(now);
            match &result {
                Ok(value) => {
                    s.data = Some(value.clone());
                    s.error = None;
                }
                Err(SessionError::Failed { source, .. }) => s.error = Some(source.clone()),
                Err(_) => {}
            }
        });

        match stale {
            Some(reason) => Err(SessionError::Cancelled { reason }),
            None => result,
        }
    }
}

impl<A, T> Drop for CallSession<A, T> {
    fn drop(&mut self) {
        self.shared.scope.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

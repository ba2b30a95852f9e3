//! Poll session: repeats one operation on a fixed wall-clock period.
//!
//! The timer runs on its own task and spawns each cycle, so a slow cycle
//! never shifts the schedule. A tick that finds the previous cycle still in
//! flight is skipped and counted instead of starting an overlapping cycle.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use callflow_core::{CancelReason, ClockSource, ExecutionOutcome, PollState, SystemClock};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use super::FlagGuard;
use crate::cancel::{CancellationToken, SessionScope};
use crate::config::MIN_POLL_INTERVAL;
use crate::executor::{ExecuteOptions, Executor};
use crate::operation::ArgOperation;

/// Construction options of a [`PollSession`].
#[derive(Clone)]
pub struct PollOptions {
    /// Period between cycles. The timer never runs faster than
    /// [`MIN_POLL_INTERVAL`].
    pub interval: Duration,
    /// Retries within one cycle.
    pub retries: u32,
    pub clock: Arc<dyn ClockSource>,
}

impl PollOptions {
    /// Interval and retries from the executor's configuration.
    #[must_use]
    pub fn new(executor: &Executor) -> Self {
        Self {
            interval: executor.config().poll.interval(),
            retries: executor.config().retry.max_retries,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the period, raised to [`MIN_POLL_INTERVAL`] if shorter.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Retries of a failed cycle before it is recorded as failed.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Clock stamped into `last_polled_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for PollOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollOptions")
            .field("interval", &self.interval)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

/// The timer of one `start_polling` .. `stop_polling` span.
struct PollRun {
    token: CancellationToken,
    ticker: JoinHandle<()>,
}

struct PollShared<T> {
    id: Uuid,
    executor: Executor,
    op: ArgOperation<(), T>,
    options: PollOptions,
    scope: SessionScope,
    state: watch::Sender<PollState<T>>,
    run: Mutex<Option<PollRun>>,
    /// Held by whichever cycle is running, timer or `refresh`, polling or
    /// not.
    in_flight: Arc<AtomicBool>,
}

/// Session that polls an operation until stopped or dropped.
pub struct PollSession<T> {
    shared: Arc<PollShared<T>>,
}

impl<T> PollSession<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Session with the executor's configured interval and retries.
    pub fn new<F, Fut>(executor: &Executor, op: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, callflow_core::OperationError>> + Send + 'static,
    {
        Self::with_options(executor, op, PollOptions::new(executor))
    }

    /// Session with explicit options. Polling starts with
    /// [`start_polling`](Self::start_polling).
    pub fn with_options<F, Fut>(executor: &Executor, op: F, options: PollOptions) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, callflow_core::OperationError>> + Send + 'static,
    {
        let (state, _) = watch::channel(PollState::default());
        Self {
            shared: Arc::new(PollShared {
                id: Uuid::new_v4(),
                executor: executor.clone(),
                op: ArgOperation::new(move |(), token| op(token)),
                options,
                scope: SessionScope::child_of(executor.root_token()),
                state,
                run: Mutex::new(None),
                in_flight: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Identifier carried in this session's log spans.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Runs one cycle now and then one every interval. Returns `false`
    /// without doing anything if already polling or disposed.
    ///
    /// If a `refresh` cycle is still in flight, the immediate cycle is
    /// skipped and counted like an overlapping tick.
    ///
    /// Must be called within a tokio runtime.
    pub fn start_polling(&self) -> bool {
        let shared = &self.shared;
        if !shared.scope.is_alive() {
            return false;
        }
        let mut run = shared.run.lock();
        if run.is_some() {
            return false;
        }

        let token = shared.scope.root().child_token();
        shared.state.send_modify(|s| s.is_polling = true);
        debug!(session_id = %shared.id, interval_ms = shared.interval_ms(), "polling started");

        PollShared::spawn_cycle(shared, &token);
        let ticker = tokio::spawn(PollShared::tick(Arc::clone(shared), token.clone()));
        *run = Some(PollRun { token, ticker });
        true
    }

    /// Stops the timer and cancels an in-flight cycle, whose result is
    /// discarded. Returns whether polling was active.
    pub fn stop_polling(&self) -> bool {
        self.shared.stop()
    }

    /// Runs one cycle now unless one is already in flight. Returns whether
    /// it ran.
    pub async fn refresh(&self) -> bool {
        let shared = &self.shared;
        if !shared.scope.is_alive() {
            return false;
        }
        let token = match &*shared.run.lock() {
            Some(run) => run.token.clone(),
            None => shared.scope.root().child_token(),
        };
        let Some(guard) = FlagGuard::try_claim(&shared.in_flight) else {
            return false;
        };
        shared.state.send_modify(|s| s.in_flight = true);
        shared.run_cycle(token, guard).await;
        true
    }

    /// Whether the timer is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.shared.run.lock().is_some()
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> PollState<T> {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PollState<T>> {
        self.shared.state.subscribe()
    }

    /// Stops polling for good. Later `start_polling` and `refresh` calls do
    /// nothing.
    pub fn dispose(&self) {
        self.shared.stop();
        self.shared.scope.dispose();
    }
}

impl<T> PollShared<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn interval_ms(&self) -> u64 {
        u64::try_from(self.options.interval.as_millis()).unwrap_or(u64::MAX)
    }

    async fn tick(shared: Arc<Self>, token: CancellationToken) {
        // `interval_at` panics on a zero period.
        let period = shared.options.interval.max(MIN_POLL_INTERVAL);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    Self::spawn_cycle(&shared, &token);
                }
            }
        }
    }

    /// Starts a cycle on its own task, or counts a skipped tick if the
    /// previous cycle is still in flight.
    fn spawn_cycle(shared: &Arc<Self>, token: &CancellationToken) {
        let Some(guard) = FlagGuard::try_claim(&shared.in_flight) else {
            debug!(session_id = %shared.id, "poll tick skipped, previous cycle in flight");
            shared.state.send_if_modified(|s| {
                if token.is_cancelled() {
                    return false;
                }
                s.skipped_cycles += 1;
                true
            });
            return;
        };

        shared.state.send_modify(|s| s.in_flight = true);
        let shared = Arc::clone(shared);
        let token = token.clone();
        tokio::spawn(async move { shared.run_cycle(token, guard).await });
    }

    async fn run_cycle(&self, token: CancellationToken, _guard: FlagGuard) {
        let options = ExecuteOptions::default()
            .named("poll_cycle")
            .with_retries(self.options.retries)
            .quiet()
            .with_cancellation(token.child_token());
        let span = info_span!("poll_session", session_id = %self.id);
        let outcome = self
            .executor
            .execute(&self.op.bind(()), options)
            .instrument(span)
            .await;
        let now = self.options.clock.now();

        self.state.send_if_modified(|s| {
            // A stopped run's results are dropped.
            if token.is_cancelled() {
                return false;
            }
            s.in_flight = false;
            s.cycles += 1;
            s.last_polled_at = Some(now);
            match outcome {
                ExecutionOutcome::Success { value, .. } => {
                    s.data = Some(value);
                    s.error = None;
                }
                ExecutionOutcome::Failure { error, .. } => s.error = Some(error),
                ExecutionOutcome::Cancelled { .. } => {}
            }
            true
        });
    }

    fn stop(&self) -> bool {
        let Some(run) = self.run.lock().take() else {
            return false;
        };
        run.token.cancel_with(CancelReason::PollStopped);
        run.ticker.abort();
        self.state.send_modify(|s| {
            s.is_polling = false;
            s.in_flight = false;
        });
        debug!(session_id = %self.id, "polling stopped");
        true
    }
}

impl<T> Drop for PollSession<T> {
    fn drop(&mut self) {
        // The ticker task keeps `shared` alive until it is stopped.
        if let Some(run) = self.shared.run.lock().take() {
            run.token.cancel_with(CancelReason::Disposed);
            run.ticker.abort();
        }
        self.shared.scope.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Batch runner: executes a list of items in concurrency-bounded chunks and
//! aggregates per-item outcomes.
//!
//! Items of one chunk run concurrently on the current task; the chunk
//! boundary is a barrier, so no item of chunk `k + 1` starts before every
//! item of chunk `k` has settled. Outcomes go into a local accumulator, and
//! the returned [`BatchOutcome`] is built from it alone.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use callflow_core::{
    BatchItemOutcome, BatchOutcome, BatchProgress, BatchState, CancelReason, ExecutionOutcome,
    OperationError,
};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::FlagGuard;
use crate::cancel::{CancellationToken, SessionScope};
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::executor::{ExecuteOptions, Executor};
use crate::operation::ArgOperation;

/// Called after every settled item.
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Options of one [`BatchRunner::execute_batch`] run.
#[derive(Clone)]
pub struct BatchOptions {
    /// Items per chunk. Zero is treated as one.
    pub batch_size: usize,
    /// Pause between chunks; none after the last.
    pub delay_between_batches: Duration,
    /// Abort at the first failed item.
    pub stop_on_error: bool,
    /// Keep item failures out of the process-wide error counter.
    pub skip_error_dispatch: bool,
    /// Called with the running count after each settled item.
    pub on_progress: Option<ProgressCallback>,
}

impl BatchOptions {
    /// Chunk size and delay from `config`; no stop-on-error, no callback.
    #[must_use]
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            delay_between_batches: config.delay_between_batches(),
            stop_on_error: false,
            skip_error_dispatch: false,
            on_progress: None,
        }
    }

    /// Sets the number of items run concurrently per chunk.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the pause before every chunk after the first.
    #[must_use]
    pub fn with_delay_between_batches(mut self, delay: Duration) -> Self {
        self.delay_between_batches = delay;
        self
    }

    /// Abort the run at the first failed item.
    #[must_use]
    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Keep item failures out of the error counter.
    #[must_use]
    pub fn skip_error_dispatch(mut self, skip: bool) -> Self {
        self.skip_error_dispatch = skip;
        self
    }

    /// Registers the progress callback.
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(BatchProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch_size", &self.batch_size)
            .field("delay_between_batches", &self.delay_between_batches)
            .field("stop_on_error", &self.stop_on_error)
            .field("skip_error_dispatch", &self.skip_error_dispatch)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Why a run stopped before its last chunk.
enum Stop {
    Aborted {
        index: usize,
        source: OperationError,
    },
    Cancelled(CancelReason),
}

/// Runs one operation over many items.
pub struct BatchRunner<I, O> {
    id: Uuid,
    executor: Executor,
    op: ArgOperation<I, O>,
    retries: u32,
    scope: SessionScope,
    state: watch::Sender<BatchState<I, O>>,
    running: Arc<AtomicBool>,
}

impl<I, O> BatchRunner<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Runner whose items retry as often as the executor's configuration
    /// says.
    pub fn new(executor: &Executor, op: ArgOperation<I, O>) -> Self {
        let (state, _) = watch::channel(BatchState::default());
        Self {
            id: Uuid::new_v4(),
            executor: executor.clone(),
            op,
            retries: executor.config().retry.max_retries,
            scope: SessionScope::child_of(executor.root_token()),
            state,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Retries per item.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Identifier carried in this runner's log spans.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Batch options from the executor's configuration.
    #[must_use]
    pub fn default_options(&self) -> BatchOptions {
        BatchOptions::from_config(&self.executor.config().batch)
    }

    /// Runs every item through the executor, `batch_size` at a time. Item
    /// failures raise no alerts.
    ///
    /// # Errors
    ///
    /// [`BatchError::AlreadyRunning`] while another run is in progress,
    /// [`BatchError::Aborted`] at the first failure under `stop_on_error`,
    /// [`BatchError::Cancelled`] if the runner is reset or disposed mid-run.
    ///
    /// Stop-on-error only keeps later chunks from starting. The items of the
    /// failing chunk have all been started by then; those still in flight are
    /// cancelled and left out of the partial outcome. With `batch_size` 1
    /// nothing after the failing item is attempted.
    pub async fn execute_batch(
        &self,
        items: Vec<I>,
        options: BatchOptions,
    ) -> Result<BatchOutcome<I, O>, BatchError<I, O>> {
        if !self.scope.is_alive() {
            return Err(BatchError::Cancelled {
                reason: CancelReason::Disposed,
                partial: BatchOutcome::from_outcomes(Vec::new()),
            });
        }
        let Some(_running) = FlagGuard::try_claim(&self.running) else {
            return Err(BatchError::AlreadyRunning);
        };

        let ticket = self.scope.begin();
        let run_token = ticket.token().clone();
        let total = items.len();
        let batch_size = options.batch_size.max(1);
        self.state.send_replace(BatchState {
            running: true,
            processed: 0,
            total,
            last_outcome: None,
        });

        let span = info_span!("batch_run", session_id = %self.id, total, batch_size);
        let mut settled = Vec::with_capacity(total);
        let stop = self
            .run_chunks(items, batch_size, &options, &run_token, &mut settled)
            .instrument(span)
            .await;
        self.scope.finish(&ticket);

        let outcome = BatchOutcome::from_outcomes(settled);
        let result = match stop {
            None => {
                info!(
                    session_id = %self.id,
                    total = outcome.total,
                    successful = outcome.successful,
                    failed = outcome.failed,
                    "batch complete"
                );
                Ok(outcome.clone())
            }
            Some(Stop::Aborted { index, source }) => {
                warn!(session_id = %self.id, index, error = %source, "batch aborted");
                Err(BatchError::Aborted {
                    index,
                    source,
                    partial: outcome.clone(),
                })
            }
            Some(Stop::Cancelled(reason)) => {
                info!(session_id = %self.id, %reason, processed = outcome.total, "batch cancelled");
                Err(BatchError::Cancelled {
                    reason,
                    partial: outcome.clone(),
                })
            }
        };

        self.state.send_if_modified(|s| {
            if run_token.is_cancelled() {
                return false;
            }
            s.running = false;
            s.last_outcome = Some(outcome);
            true
        });
        result
    }

    async fn run_chunks(
        &self,
        items: Vec<I>,
        batch_size: usize,
        options: &BatchOptions,
        run_token: &CancellationToken,
        settled: &mut Vec<BatchItemOutcome<I, O>>,
    ) -> Option<Stop> {
        let total = items.len();
        let mut pending = items.into_iter().enumerate().peekable();
        let mut first = true;

        while pending.peek().is_some() {
            if !first && !options.delay_between_batches.is_zero() {
                tokio::select! {
                    biased;
                    () = run_token.cancelled() => {}
                    () = tokio::time::sleep(options.delay_between_batches) => {}
                }
            }
            first = false;
            if let Some(reason) = run_token.reason() {
                return Some(Stop::Cancelled(reason));
            }

            let chunk: Vec<(usize, I)> = pending.by_ref().take(batch_size).collect();
            let chunk_token = run_token.child_token();
            if let Some(stop) = self
                .run_chunk(chunk, &chunk_token, options, total, settled)
                .await
            {
                return Some(stop);
            }
        }
        None
    }

    async fn run_chunk(
        &self,
        chunk: Vec<(usize, I)>,
        chunk_token: &CancellationToken,
        options: &BatchOptions,
        total: usize,
        settled: &mut Vec<BatchItemOutcome<I, O>>,
    ) -> Option<Stop> {
        let mut in_flight: FuturesUnordered<_> = chunk
            .into_iter()
            .map(|(index, item)| self.run_item(index, item, chunk_token.clone(), options))
            .collect();

        while let Some((index, item, outcome)) = in_flight.next().await {
            let result = match outcome {
                ExecutionOutcome::Success { value, .. } => Ok(value),
                ExecutionOutcome::Failure { error, .. } => Err(error),
                ExecutionOutcome::Cancelled { reason, .. } => {
                    if let Some(run_reason) = chunk_token.reason() {
                        return Some(Stop::Cancelled(run_reason));
                    }
                    // The operation reported a cancellation of its own.
                    Err(OperationError::cancelled(reason))
                }
            };

            let abort = match &result {
                Err(error) if options.stop_on_error => Some(error.clone()),
                _ => None,
            };
            settled.push(BatchItemOutcome {
                index,
                item,
                result,
            });
            self.report_progress(settled.len(), total, chunk_token, options);

            if let Some(source) = abort {
                chunk_token.cancel_with(CancelReason::BatchAborted);
                return Some(Stop::Aborted { index, source });
            }
        }
        None
    }

    fn run_item(
        &self,
        index: usize,
        item: I,
        token: CancellationToken,
        options: &BatchOptions,
    ) -> impl Future<Output = (usize, I, ExecutionOutcome<O>)> + '_ {
        let exec_options = ExecuteOptions::default()
            .named("batch_item")
            .with_retries(self.retries)
            .quiet()
            .skip_error_dispatch(options.skip_error_dispatch)
            .with_cancellation(token);
        let op = self.op.bind(item.clone());
        async move {
            let outcome = self.executor.execute(&op, exec_options).await;
            (index, item, outcome)
        }
    }

    fn report_progress(
        &self,
        processed: usize,
        total: usize,
        token: &CancellationToken,
        options: &BatchOptions,
    ) {
        self.state.send_if_modified(|s| {
            if token.is_cancelled() {
                return false;
            }
            s.processed = processed;
            true
        });
        if let Some(on_progress) = &options.on_progress {
            on_progress(BatchProgress { processed, total });
        }
    }

    /// Cancels a running batch and clears the state.
    pub fn reset(&self) {
        self.scope.cancel_current(CancelReason::Reset);
        self.state.send_replace(BatchState::default());
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> BatchState<I, O> {
        self.state.borrow().clone()
    }

    /// Items settled so far in the current or last run.
    #[must_use]
    pub fn progress(&self) -> BatchProgress {
        self.state.borrow().progress()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BatchState<I, O>> {
        self.state.subscribe()
    }

    /// Cancels a running batch and refuses further runs.
    pub fn dispose(&self) {
        self.scope.dispose();
    }
}

impl<I, O> Drop for BatchRunner<I, O> {
    fn drop(&mut self) {
        self.scope.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

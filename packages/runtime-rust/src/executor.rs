//! The executor: runs one operation with retry, cancellation, and side-effect
//! dispatch to the alert sink and the error counter.
//!
//! Attempts are strictly sequential. Each attempt races the operation against
//! the call's cancellation token, so a cancellation requested mid-attempt or
//! during a backoff wait settles the call as `Cancelled` at once and no
//! further attempt starts.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use callflow_core::{
    Alert, AlertSink, CancelReason, ErrorCounter, ErrorKind, ExecutionOutcome, OperationError,
    RetryPolicy,
};
use tracing::{debug, info_span, warn, Instrument};

use crate::cancel::CancellationToken;
use crate::config::RuntimeConfig;
use crate::operation::Operation;
use crate::retry::BackoffPolicy;

/// Side effect run with the value of a successful execution.
pub type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Side effect run with the error of a failed execution.
pub type ErrorCallback = Arc<dyn Fn(&OperationError) + Send + Sync>;

// ---------------------------------------------------------------------------
// ExecuteOptions
// ---------------------------------------------------------------------------

/// Per-call execution options.
pub struct ExecuteOptions<T> {
    /// Recorded on the tracing span.
    pub name: &'static str,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Overrides the backoff base delay for this call. Only the executor's
    /// own [`BackoffPolicy`] honours it; a policy installed with
    /// [`Executor::with_retry_policy`] keeps its schedule.
    pub retry_delay_base: Option<Duration>,
    /// Emits a success alert with this message when set.
    pub success_message: Option<String>,
    /// Emits an error alert when the execution fails.
    pub show_error_message: bool,
    /// Title of the error alert. Defaults to "Error".
    pub error_title: Option<String>,
    /// Error alert stays until dismissed.
    pub persistent_error: bool,
    /// Leaves the process-wide error counter untouched.
    pub skip_error_dispatch: bool,
    /// Externally owned token. Without one, the executor derives a token from
    /// its root.
    pub cancellation: Option<CancellationToken>,
    /// Called with the value of a successful execution.
    pub on_success: Option<SuccessCallback<T>>,
    /// Called once with the final error of a failed execution.
    pub on_error: Option<ErrorCallback>,
}

impl<T> ExecuteOptions<T> {
    /// Sets the name recorded on the tracing span.
    #[must_use]
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Sets the number of retries after the first attempt.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Overrides the backoff base delay; see [`ExecuteOptions::retry_delay_base`].
    #[must_use]
    pub fn with_retry_delay_base(mut self, base: Duration) -> Self {
        self.retry_delay_base = Some(base);
        self
    }

    /// Emits a success alert with `message`.
    #[must_use]
    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    /// Sets the title of the error alert.
    #[must_use]
    pub fn with_error_title(mut self, title: impl Into<String>) -> Self {
        self.error_title = Some(title.into());
        self
    }

    /// Whether a failure raises an error alert.
    #[must_use]
    pub fn show_error_message(mut self, show: bool) -> Self {
        self.show_error_message = show;
        self
    }

    /// Whether the error alert stays until dismissed.
    #[must_use]
    pub fn persistent_error(mut self, persistent: bool) -> Self {
        self.persistent_error = persistent;
        self
    }

    /// Keeps failures out of the error counter.
    #[must_use]
    pub fn skip_error_dispatch(mut self, skip: bool) -> Self {
        self.skip_error_dispatch = skip;
        self
    }

    /// Runs under `token` instead of a token derived from the executor.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Registers the success callback.
    #[must_use]
    pub fn on_success(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Registers the failure callback.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&OperationError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// No error alerts. Used by batch items and poll cycles, whose failures are
    /// reported through their own state instead.
    #[must_use]
    pub fn quiet(self) -> Self {
        self.show_error_message(false)
    }
}

impl<T> Default for ExecuteOptions<T> {
    fn default() -> Self {
        Self {
            name: "operation",
            retries: 0,
            retry_delay_base: None,
            success_message: None,
            show_error_message: true,
            error_title: None,
            persistent_error: true,
            skip_error_dispatch: false,
            cancellation: None,
            on_success: None,
            on_error: None,
        }
    }
}

impl<T> Clone for ExecuteOptions<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            retries: self.retries,
            retry_delay_base: self.retry_delay_base,
            success_message: self.success_message.clone(),
            show_error_message: self.show_error_message,
            error_title: self.error_title.clone(),
            persistent_error: self.persistent_error,
            skip_error_dispatch: self.skip_error_dispatch,
            cancellation: self.cancellation.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T> fmt::Debug for ExecuteOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("retry_delay_base", &self.retry_delay_base)
            .field("success_message", &self.success_message)
            .field("show_error_message", &self.show_error_message)
            .field("error_title", &self.error_title)
            .field("persistent_error", &self.persistent_error)
            .field("skip_error_dispatch", &self.skip_error_dispatch)
            .field("cancellation", &self.cancellation.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs operations with retry, cancellation and alert/error dispatch.
///
/// Cheap to clone; clones share collaborators and the root cancellation token.
#[derive(Clone)]
pub struct Executor {
    alerts: Arc<dyn AlertSink>,
    errors: Arc<dyn ErrorCounter>,
    retry_policy: Arc<dyn RetryPolicy>,
    /// Set while `retry_policy` is the config-built backoff.
    backoff: Option<BackoffPolicy>,
    config: Arc<RuntimeConfig>,
    root: CancellationToken,
}

impl Executor {
    /// Executor with default configuration and a [`BackoffPolicy`].
    pub fn new(alerts: Arc<dyn AlertSink>, errors: Arc<dyn ErrorCounter>) -> Self {
        let config = RuntimeConfig::default();
        let backoff = BackoffPolicy::from_config(&config.retry);
        Self {
            alerts,
            errors,
            retry_policy: Arc::new(backoff.clone()),
            backoff: Some(backoff),
            config: Arc::new(config),
            root: CancellationToken::new(),
        }
    }

    /// Replaces the configuration and rebuilds the backoff policy from it.
    /// Apply [`Executor::with_retry_policy`] afterwards to keep a custom policy.
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        let backoff = BackoffPolicy::from_config(&config.retry);
        self.retry_policy = Arc::new(backoff.clone());
        self.backoff = Some(backoff);
        self.config = Arc::new(config);
        self
    }

    /// Replaces the retry policy. Per-call `retry_delay_base` overrides no
    /// longer apply.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(policy);
        self.backoff = None;
        self
    }

    /// Configuration the executor and its sessions read defaults from.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Sink receiving success and error alerts.
    #[must_use]
    pub fn alerts(&self) -> &Arc<dyn AlertSink> {
        &self.alerts
    }

    /// Counter of failed attempts.
    #[must_use]
    pub fn errors(&self) -> &Arc<dyn ErrorCounter> {
        &self.errors
    }

    /// Ancestor of every token the executor derives. Session scopes hang off
    /// it so that [`Executor::cancel`] reaches them.
    #[must_use]
    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    /// Options carrying the configured retry count.
    #[must_use]
    pub fn default_options<T>(&self) -> ExecuteOptions<T> {
        ExecuteOptions {
            retries: self.config.retry.max_retries,
            ..ExecuteOptions::default()
        }
    }

    /// Cancels every execution started through this executor (and its
    /// clones). Executions started afterwards settle as cancelled without
    /// invoking their operation.
    pub fn cancel(&self) {
        self.root.cancel_with(CancelReason::Requested);
    }

    /// Whether [`Executor::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Runs `operation` to a terminal outcome.
    pub async fn execute<O>(
        &self,
        operation: &O,
        options: ExecuteOptions<O::Output>,
    ) -> ExecutionOutcome<O::Output>
    where
        O: Operation + ?Sized,
    {
        let span = info_span!(
            "operation",
            name = options.name,
            max_retries = options.retries,
            attempts = tracing::field::Empty,
            outcome = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        let start = Instant::now();
        let outcome = self
            .run_attempts(operation, options)
            .instrument(span.clone())
            .await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        span.record("attempts", outcome.attempts());
        span.record("outcome", outcome.label());
        span.record("duration_ms", duration_ms);
        metrics::histogram!("callflow_operation_attempts", "outcome" => outcome.label())
            .record(f64::from(outcome.attempts()));

        outcome
    }

    async fn run_attempts<O>(
        &self,
        operation: &O,
        options: ExecuteOptions<O::Output>,
    ) -> ExecutionOutcome<O::Output>
    where
        O: Operation + ?Sized,
    {
        let token = options
            .cancellation
            .clone()
            .unwrap_or_else(|| self.root.child_token());
        let max_retries = options.retries;
        let mut attempt: u32 = 1;

        loop {
            if let Some(reason) = self.cancel_reason(&token) {
                debug!(attempt, %reason, "cancelled before attempt");
                return ExecutionOutcome::Cancelled {
                    reason,
                    attempts: attempt.saturating_sub(1).max(1),
                };
            }

            let result = tokio::select! {
                biased;
                () = self.cancelled(&token) => Err(OperationError::cancelled(
                    self.cancel_reason(&token).unwrap_or(CancelReason::Requested),
                )),
                result = operation.run(token.clone()) => result,
            };

            // A result that lands after cancellation is discarded.
            if let Some(reason) = self.cancel_reason(&token) {
                debug!(attempt, %reason, "cancelled during attempt");
                return ExecutionOutcome::Cancelled {
                    reason,
                    attempts: attempt,
                };
            }

            let error = match result {
                Ok(value) => {
                    self.dispatch_success(&options, &value);
                    return ExecutionOutcome::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(OperationError::Cancelled { reason }) => {
                    debug!(attempt, %reason, "operation reported cancellation");
                    return ExecutionOutcome::Cancelled {
                        reason,
                        attempts: attempt,
                    };
                }
                Err(error) => error,
            };

            if !options.skip_error_dispatch {
                self.errors.increment();
            }

            if attempt <= max_retries
                && self.retry_policy.is_retryable(&error, attempt, max_retries)
            {
                let delay = self.retry_delay(&options, attempt, &error);
                debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    %error,
                    "retrying after backoff"
                );

                let cancelled = tokio::select! {
                    biased;
                    () = self.cancelled(&token) => true,
                    () = tokio::time::sleep(delay) => false,
                };
                if cancelled {
                    let reason = self.cancel_reason(&token).unwrap_or(CancelReason::Requested);
                    debug!(attempt, %reason, "cancelled during backoff");
                    return ExecutionOutcome::Cancelled {
                        reason,
                        attempts: attempt,
                    };
                }

                attempt += 1;
                continue;
            }

            let kind = if error.is_transient() && attempt > max_retries {
                ErrorKind::Exhausted
            } else {
                ErrorKind::Terminal
            };
            self.dispatch_failure(&options, &error, kind, attempt);
            return ExecutionOutcome::Failure {
                error,
                kind,
                attempts: attempt,
            };
        }
    }

    fn retry_delay<T>(
        &self,
        options: &ExecuteOptions<T>,
        attempt: u32,
        error: &OperationError,
    ) -> Duration {
        match (options.retry_delay_base, &self.backoff) {
            (Some(base), Some(backoff)) => backoff
                .clone()
                .with_base_delay(base)
                .retry_delay(attempt, error),
            _ => self.retry_policy.retry_delay(attempt, error),
        }
    }

    async fn cancelled(&self, token: &CancellationToken) {
        tokio::select! {
            () = token.cancelled() => {}
            () = self.root.cancelled() => {}
        }
    }

    fn cancel_reason(&self, token: &CancellationToken) -> Option<CancelReason> {
        token.reason().or_else(|| self.root.reason())
    }

    fn dispatch_success<T>(&self, options: &ExecuteOptions<T>, value: &T) {
        if let Some(message) = &options.success_message {
            self.alerts.notify(Alert::success("Success", message.clone()));
        }
        if let Some(on_success) = &options.on_success {
            on_success(value);
        }
    }

    fn dispatch_failure<T>(
        &self,
        options: &ExecuteOptions<T>,
        error: &OperationError,
        kind: ErrorKind,
        attempts: u32,
    ) {
        warn!(attempts, kind = kind.as_str(), %error, "operation failed");
        if options.show_error_message {
            let title = options
                .error_title
                .clone()
                .unwrap_or_else(|| "Error".to_string());
            self.alerts.notify(
                Alert::error(title, error.user_message()).persistent(options.persistent_error),
            );
        }
        if let Some(on_error) = &options.on_error {
            on_error(error);
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("cancelled", &self.root.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use callflow_core::AlertKind;
    use proptest::prelude::*;

    use super::*;
    use crate::testing::{Harness, RecordingAlertSink};

    /// Fails with `error` on every attempt before `succeed_on`, then returns
    /// the attempt number.
    fn flaky(
        calls: &Arc<AtomicU32>,
        succeed_on: u32,
        error: OperationError,
    ) -> impl Fn(CancellationToken) -> futures_util::future::Ready<Result<u32, OperationError>>
    {
        let calls = Arc::clone(calls);
        move |_token| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= succeed_on {
                futures_util::future::ready(Ok(n))
            } else {
                futures_util::future::ready(Err(error.clone()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let h = Harness::new();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(AtomicU32::new(0));
        let seen_cb = Arc::clone(&seen);

        let outcome = h
            .executor
            .execute(
                &flaky(&calls, 1, OperationError::transport("x")),
                ExecuteOptions::default()
                    .with_success_message("Visitor checked in")
                    .on_success(move |v: &u32| {
                        seen_cb.store(*v, Ordering::SeqCst);
                    }),
            )
            .await;

        assert_eq!(outcome, ExecutionOutcome::Success { value: 1, attempts: 1 });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let alerts = h.alerts.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Success);
        assert_eq!(alerts[0].message, "Visitor checked in");
        assert_eq!(h.errors.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_and_stops() {
        let h = Harness::new();
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = h
            .executor
            .execute(
                &flaky(&calls, 3, OperationError::status(503, "busy")),
                ExecuteOptions::default().with_retries(5),
            )
            .await;

        assert_eq!(outcome, ExecutionOutcome::Success { value: 3, attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two failed attempts were counted, none alerted.
        assert_eq!(h.errors.count(), 2);
        assert!(h.alerts.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_transient_failure_is_exhausted() {
        let h = Harness::new();
        let calls = Arc::new(AtomicU32::new(0));
        let errors_seen = Arc::new(AtomicU32::new(0));
        let errors_cb = Arc::clone(&errors_seen);

        let outcome = h
            .executor
            .execute(
                &flaky(&calls, u32::MAX, OperationError::transport("reset")),
                ExecuteOptions::default()
                    .with_retries(3)
                    .with_error_title("Could not load visitors")
                    .on_error(move |_| {
                        errors_cb.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .await;

        match outcome {
            ExecutionOutcome::Failure { kind, attempts, .. } => {
                assert_eq!(kind, ErrorKind::Exhausted);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.errors.count(), 4);
        assert_eq!(errors_seen.load(Ordering::SeqCst), 1);

        let alerts = h.alerts.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Error);
        assert_eq!(alerts[0].title, "Could not load visitors");
        assert!(alerts[0].persistent);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let h = Harness::new();
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = h
            .executor
            .execute(
                &flaky(&calls, u32::MAX, OperationError::status(404, "no such visitor")),
                ExecuteOptions::default().with_retries(5),
            )
            .await;

        assert!(matches!(
            outcome,
            ExecutionOutcome::Failure {
                kind: ErrorKind::Terminal,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Retries transient errors after a fixed pause.
    struct FixedDelay(Duration);

    impl RetryPolicy for FixedDelay {
        fn is_retryable(&self, error: &OperationError, attempt: u32, max_retries: u32) -> bool {
            attempt <= max_retries && error.is_transient()
        }

        fn retry_delay(&self, _attempt: u32, _error: &OperationError) -> Duration {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn custom_policy_ignores_per_call_delay_base() {
        let h = Harness::new();
        let executor = h
            .executor
            .clone()
            .with_retry_policy(FixedDelay(Duration::from_millis(50)));
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let outcome = executor
            .execute(
                &flaky(&calls, 3, OperationError::transport("reset")),
                ExecuteOptions::default()
                    .with_retries(5)
                    .with_retry_delay_base(Duration::from_secs(10)),
            )
            .await;

        assert_eq!(outcome, ExecutionOutcome::Success { value: 3, attempts: 3 });
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_delay_base_scales_the_backoff() {
        let h = Harness::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let outcome = h
            .executor
            .execute(
                &flaky(&calls, 3, OperationError::transport("reset")),
                ExecuteOptions::default()
                    .with_retries(5)
                    .with_retry_delay_base(Duration::from_millis(200)),
            )
            .await;

        // 200ms before the second attempt, 400ms before the third.
        assert_eq!(outcome, ExecutionOutcome::Success { value: 3, attempts: 3 });
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let h = Harness::new();
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let executor = h.executor.clone();
        let op = flaky(&calls, u32::MAX, OperationError::transport("reset"));
        let options = ExecuteOptions::default()
            .with_retries(3)
            .with_retry_delay_base(Duration::from_secs(10))
            .with_cancellation(token.clone());
        let handle = tokio::spawn(async move { executor.execute(&op, options).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        token.cancel();

        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Cancelled {
                reason: CancelReason::Requested,
                attempts: 1,
            }
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // No failure alert for a cancelled call.
        assert!(h.alerts.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_attempt_drops_the_attempt() {
        let h = Harness::new();
        let token = CancellationToken::new();
        let op = |_token: CancellationToken| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, OperationError>(7_u32)
        };

        let executor = h.executor.clone();
        let options = ExecuteOptions::default().with_cancellation(token.clone());
        let handle = tokio::spawn(async move { executor.execute(&op, options).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel_with(CancelReason::Reset);

        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Cancelled {
                reason: CancelReason::Reset,
                attempts: 1,
            }
        );
    }

    #[tokio::test]
    async fn reported_cancellation_is_not_an_error() {
        let h = Harness::new();
        let op = |_token: CancellationToken| async {
            Err::<(), _>(OperationError::cancelled(CancelReason::Requested))
        };

        let outcome = h
            .executor
            .execute(&op, ExecuteOptions::default().with_retries(3))
            .await;

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(h.errors.count(), 0);
        assert!(h.alerts.alerts().is_empty());
    }

    #[tokio::test]
    async fn skip_error_dispatch_and_quiet() {
        let h = Harness::new();
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = h
            .executor
            .execute(
                &flaky(&calls, u32::MAX, OperationError::other("bad")),
                ExecuteOptions::default().skip_error_dispatch(true).quiet(),
            )
            .await;

        assert!(outcome.is_failure());
        assert_eq!(h.errors.count(), 0);
        assert!(h.alerts.alerts().is_empty());
    }

    #[tokio::test]
    async fn cancelled_executor_never_invokes() {
        let h = Harness::new();
        let calls = Arc::new(AtomicU32::new(0));
        h.executor.cancel();
        assert!(h.executor.is_cancelled());

        let outcome = h
            .executor
            .execute(
                &flaky(&calls, 1, OperationError::other("x")),
                ExecuteOptions::default(),
            )
            .await;

        assert_eq!(
            outcome,
            ExecutionOutcome::Cancelled {
                reason: CancelReason::Requested,
                attempts: 1,
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn server_retry_hint_sets_the_wait() {
        let h = Harness::new();
        let calls = Arc::new(AtomicU32::new(0));
        let op = flaky(
            &calls,
            2,
            OperationError::status(429, "slow down").with_retry_after(Duration::from_secs(5)),
        );

        let executor = h.executor.clone();
        let handle = tokio::spawn(async move {
            executor
                .execute(&op, ExecuteOptions::default().with_retries(1))
                .await
        });

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(handle.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn default_options_follow_config() {
        let mut config = RuntimeConfig::default();
        config.retry.max_retries = 4;
        let executor = Executor::new(
            Arc::new(RecordingAlertSink::new()),
            Arc::new(callflow_core::AtomicErrorCounter::new()),
        )
        .with_config(config);

        let options: ExecuteOptions<()> = executor.default_options();
        assert_eq!(options.retries, 4);
        assert!(options.show_error_message);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn permanent_failure_makes_exactly_n_plus_one_attempts(max_retries in 0u32..6) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let h = Harness::new();
            let calls = Arc::new(AtomicU32::new(0));
            let op = flaky(&calls, u32::MAX, OperationError::transport("down"));

            let outcome = rt.block_on(
                h.executor
                    .execute(&op, ExecuteOptions::default().with_retries(max_retries)),
            );

            prop_assert!(outcome.is_failure());
            prop_assert_eq!(outcome.attempts(), max_retries + 1);
            prop_assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
        }

        #[test]
        fn success_on_attempt_k_stops_there(max_retries in 0u32..6, k_offset in 0u32..6) {
            let k = (k_offset % (max_retries + 1)) + 1;
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let h = Harness::new();
            let calls = Arc::new(AtomicU32::new(0));
            let op = flaky(&calls, k, OperationError::transport("down"));

            let outcome = rt.block_on(
                h.executor
                    .execute(&op, ExecuteOptions::default().with_retries(max_retries)),
            );

            prop_assert_eq!(outcome, ExecutionOutcome::Success { value: k, attempts: k });
            prop_assert_eq!(calls.load(Ordering::SeqCst), k);
        }
    }
}

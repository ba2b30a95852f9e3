//! Default retry policy: exponential backoff over transient errors.

use std::time::Duration;

use callflow_core::{ErrorKind, OperationError, RetryPolicy};
use rand::Rng;

use crate::config::RetryConfig;

/// Retries transient errors with exponentially growing delays.
///
/// Attempt `n` waits `base * 2^(n-1)`, capped at `max_delay`. A server retry
/// hint on the error replaces the computed delay (still capped). With jitter
/// on, the delay is drawn uniformly from `0..=delay`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    /// Policy with the configured base, cap and jitter.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter,
        }
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Draws each delay uniformly up to the computed backoff.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retrying after attempt `attempt`, without hint or jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy for BackoffPolicy {
    fn is_retryable(&self, error: &OperationError, attempt: u32, max_retries: u32) -> bool {
        attempt <= max_retries && error.kind() == ErrorKind::Transient
    }

    fn retry_delay(&self, attempt: u32, error: &OperationError) -> Duration {
        if let Some(hint) = error.retry_after() {
            return hint.min(self.max_delay);
        }
        let delay = self.backoff(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1_000))
    }

    #[test]
    fn delays_double_until_capped() {
        let policy = policy();
        let err = OperationError::transport("reset");
        let delays: Vec<_> = (1..=6).map(|a| policy.retry_delay(a, &err)).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1_000, 1_000].map(Duration::from_millis)
        );
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        assert_eq!(policy().backoff(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn server_hint_overrides_backoff() {
        let policy = policy();
        let hinted = OperationError::status(429, "slow down").with_retry_after(Duration::from_millis(250));
        assert_eq!(policy.retry_delay(3, &hinted), Duration::from_millis(250));

        let too_long = OperationError::status(503, "busy").with_retry_after(Duration::from_secs(60));
        assert_eq!(policy.retry_delay(1, &too_long), Duration::from_millis(1_000));
    }

    #[test]
    fn only_transient_errors_within_budget_are_retryable() {
        let policy = policy();
        assert!(policy.is_retryable(&OperationError::transport("x"), 1, 2));
        assert!(policy.is_retryable(&OperationError::status(502, "x"), 2, 2));
        assert!(!policy.is_retryable(&OperationError::transport("x"), 3, 2));
        assert!(!policy.is_retryable(&OperationError::status(400, "x"), 1, 2));
        assert!(!policy.is_retryable(
            &OperationError::cancelled(callflow_core::CancelReason::Reset),
            1,
            2
        ));
    }

    #[test]
    fn jitter_stays_within_backoff() {
        let policy = policy().with_jitter(true);
        let err = OperationError::transport("x");
        for attempt in 1..=5 {
            assert!(policy.retry_delay(attempt, &err) <= policy.backoff(attempt));
        }
    }
}

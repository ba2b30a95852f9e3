//! Retry policy contract consumed by the executor.

use std::time::Duration;

use crate::error::OperationError;

/// Decides whether a failed attempt is retried and how long to wait first.
///
/// `attempt` is 1-based: the first invocation is attempt 1. The executor only
/// retries while `attempt <= max_retries`, whatever the policy answers.
pub trait RetryPolicy: Send + Sync {
    /// Whether `error`, raised by attempt number `attempt`, may be retried.
    fn is_retryable(&self, error: &OperationError, attempt: u32, max_retries: u32) -> bool;

    /// Delay before attempt `attempt + 1`. May read hints carried by `error`.
    fn retry_delay(&self, attempt: u32, error: &OperationError) -> Duration;
}

/// Policy that never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn is_retryable(&self, _error: &OperationError, _attempt: u32, _max_retries: u32) -> bool {
        false
    }

    fn retry_delay(&self, _attempt: u32, _error: &OperationError) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retry_declines_everything() {
        let policy = NoRetry;
        assert!(!policy.is_retryable(&OperationError::transport("x"), 1, 5));
        assert_eq!(policy.retry_delay(1, &OperationError::transport("x")), Duration::ZERO);
    }
}

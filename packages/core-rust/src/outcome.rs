//! Terminal result of one executor run.

use crate::cancel::CancelReason;
use crate::error::{ErrorKind, OperationError};

/// Result of running one operation to completion through the executor.
///
/// `attempts` is always at least 1 and never more than `max_retries + 1`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome<T> {
    Success {
        value: T,
        attempts: u32,
    },
    Failure {
        error: OperationError,
        kind: ErrorKind,
        attempts: u32,
    },
    Cancelled {
        reason: CancelReason,
        attempts: u32,
    },
}

impl<T> ExecutionOutcome<T> {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Failure { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&OperationError> {
        match self {
            Self::Failure { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Label recorded on tracing spans and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExecutionOutcome<U> {
        match self {
            Self::Success { value, attempts } => ExecutionOutcome::Success {
                value: f(value),
                attempts,
            },
            Self::Failure {
                error,
                kind,
                attempts,
            } => ExecutionOutcome::Failure {
                error,
                kind,
                attempts,
            },
            Self::Cancelled { reason, attempts } => ExecutionOutcome::Cancelled { reason, attempts },
        }
    }

    /// Collapses the outcome into a `Result`; cancellation becomes
    /// [`OperationError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns the failure's error, or a cancellation error.
    pub fn into_result(self) -> Result<T, OperationError> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Failure { error, .. } => Err(error),
            Self::Cancelled { reason, .. } => Err(OperationError::cancelled(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let ok: ExecutionOutcome<u32> = ExecutionOutcome::Success {
            value: 7,
            attempts: 2,
        };
        assert!(ok.is_success());
        assert_eq!(ok.attempts(), 2);
        assert_eq!(ok.value(), Some(&7));
        assert_eq!(ok.label(), "success");
        assert_eq!(ok.map(|v| v * 2).into_result(), Ok(14));
    }

    #[test]
    fn cancelled_into_result_is_cancel_error() {
        let outcome: ExecutionOutcome<()> = ExecutionOutcome::Cancelled {
            reason: CancelReason::Reset,
            attempts: 1,
        };
        assert_eq!(
            outcome.into_result(),
            Err(OperationError::cancelled(CancelReason::Reset))
        );
    }
}

//! Errors surfaced by the sessions.

use callflow_core::{BatchOutcome, CancelReason, ErrorKind, ExecutionOutcome, OperationError};

/// Error returned by session methods.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The operation failed after the executor gave up on it.
    #[error("{} failure after {attempts} attempt(s): {source}", .kind.as_str())]
    Failed {
        source: OperationError,
        kind: ErrorKind,
        attempts: u32,
    },
    /// The call was cancelled, superseded or reset before it settled.
    #[error("call cancelled: {reason}")]
    Cancelled { reason: CancelReason },
    #[error("no previous arguments to retry with")]
    NothingToRetry,
    #[error("an optimistic update is already in flight")]
    Busy,
    #[error("session disposed")]
    Disposed,
}

impl SessionError {
    /// Whether the call ended by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Disposed)
    }

    /// The underlying operation error of a failed call.
    #[must_use]
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            Self::Failed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Converts an executor outcome into a session result.
///
/// # Errors
///
/// [`SessionError::Failed`] for a failure and [`SessionError::Cancelled`] for
/// a cancellation.
pub fn into_session_result<T>(outcome: ExecutionOutcome<T>) -> Result<T, SessionError> {
    match outcome {
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
    }
}

/// Error returned by [`crate::session::BatchRunner::execute_batch`].
///
/// Every variant that ends a started run carries the items that settled
/// before it stopped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError<I, O> {
    /// `stop_on_error` was set and the item at `index` failed.
    #[error("batch aborted at item {index}: {source}")]
    Aborted {
        index: usize,
        source: OperationError,
        partial: BatchOutcome<I, O>,
    },
    #[error("batch cancelled: {reason}")]
    Cancelled {
        reason: CancelReason,
        partial: BatchOutcome<I, O>,
    },
    #[error("a batch is already running on this runner")]
    AlreadyRunning,
}

impl<I, O> BatchError<I, O> {
    /// Items that settled before the run stopped.
    #[must_use]
    pub fn partial(&self) -> Option<&BatchOutcome<I, O>> {
        match self {
            Self::Aborted { partial, .. } | Self::Cancelled { partial, .. } => Some(partial),
            Self::AlreadyRunning => None,
        }
    }
}

//! Errors returned by operations and the taxonomy the executor sorts them into.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelReason;

/// Classification of an operation failure.
///
/// `Cancelled` is never retried, counted or surfaced. `Transient` failures are
/// eligible for retry. `Terminal` failures fail immediately. `Exhausted` is
/// assigned by the executor to a transient failure whose retry budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cancelled,
    Transient,
    Terminal,
    Exhausted,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Transient => "transient",
            Self::Terminal => "terminal",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Error produced by an operation.
///
/// Operations are responsible for reporting intentional cancellation as
/// [`OperationError::Cancelled`] so the executor can tell it apart from a
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("operation cancelled: {reason}")]
    Cancelled { reason: CancelReason },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// Server-provided retry hint, in milliseconds.
        retry_after_ms: Option<u64>,
    },
    #[error("request failed with status {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// Server-provided retry hint, in milliseconds (e.g. `Retry-After`).
        retry_after_ms: Option<u64>,
    },
    #[error("{message}")]
    Other { message: String },
}

impl OperationError {
    #[must_use]
    pub fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled { reason }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Attaches a server-provided retry hint. No effect on variants that
    /// cannot carry one.
    #[must_use]
    pub fn with_retry_after(mut self, hint: Duration) -> Self {
        let hint_ms = u64::try_from(hint.as_millis()).unwrap_or(u64::MAX);
        match &mut self {
            Self::Transport { retry_after_ms, .. } | Self::Status { retry_after_ms, .. } => {
                *retry_after_ms = Some(hint_ms);
            }
            _ => {}
        }
        self
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Kind of this error as reported by the operation itself. Never
    /// `Exhausted`: only the executor knows the retry budget.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Timeout { .. } | Self::Transport { .. } => ErrorKind::Transient,
            Self::Status { status, .. } if is_transient_status(*status) => ErrorKind::Transient,
            Self::Status { .. } | Self::Other { .. } => ErrorKind::Terminal,
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// HTTP status, when the failure came from a response.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transport-level retry hint, if the server sent one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport { retry_after_ms, .. } | Self::Status { retry_after_ms, .. } => {
                retry_after_ms.map(Duration::from_millis)
            }
            _ => None,
        }
    }

    /// Message suitable for showing to an end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Cancelled { .. } => "The request was cancelled.".to_string(),
            Self::Timeout { .. } => "The request timed out. Please try again.".to_string(),
            Self::Transport { .. } => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            Self::Status {
                status, message, ..
            } => match status {
                400 | 422 if !message.is_empty() => format!("The request was invalid: {message}"),
                400 | 422 => "The request was invalid.".to_string(),
                401 => "Your session has expired. Please sign in again.".to_string(),
                403 => "You do not have permission to perform this action.".to_string(),
                404 => "The requested resource was not found.".to_string(),
                409 => "The resource was modified by someone else. Reload and try again."
                    .to_string(),
                429 => "Too many requests. Please wait a moment and try again.".to_string(),
                500..=599 => "The server encountered an error. Please try again later.".to_string(),
                _ if !message.is_empty() => message.clone(),
                _ => format!("The request failed with status {status}."),
            },
            Self::Other { message } => message.clone(),
        }
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            message: format!("{err:#}"),
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 500..=599)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            OperationError::cancelled(CancelReason::Reset).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            OperationError::Timeout { timeout_ms: 10 }.kind(),
            ErrorKind::Transient
        );
        assert_eq!(OperationError::transport("reset").kind(), ErrorKind::Transient);
        assert_eq!(OperationError::status(503, "busy").kind(), ErrorKind::Transient);
        assert_eq!(OperationError::status(429, "slow down").kind(), ErrorKind::Transient);
        assert_eq!(OperationError::status(404, "gone").kind(), ErrorKind::Terminal);
        assert_eq!(OperationError::status(422, "bad").kind(), ErrorKind::Terminal);
        assert_eq!(OperationError::other("boom").kind(), ErrorKind::Terminal);
    }

    #[test]
    fn retry_hint_only_on_transport_and_status() {
        let hinted = OperationError::status(429, "slow").with_retry_after(Duration::from_secs(2));
        assert_eq!(hinted.retry_after(), Some(Duration::from_secs(2)));

        let other = OperationError::other("x").with_retry_after(Duration::from_secs(2));
        assert_eq!(other.retry_after(), None);
    }

    #[test]
    fn user_messages() {
        assert_eq!(
            OperationError::status(403, "").user_message(),
            "You do not have permission to perform this action."
        );
        assert_eq!(
            OperationError::status(422, "name is required").user_message(),
            "The request was invalid: name is required"
        );
        assert_eq!(
            OperationError::status(418, "teapot").user_message(),
            "teapot"
        );
        assert_eq!(OperationError::other("custom").user_message(), "custom");
    }

    #[test]
    fn from_anyhow_keeps_context_chain() {
        let err = anyhow::anyhow!("inner").context("outer");
        let op: OperationError = err.into();
        assert_eq!(op, OperationError::other("outer: inner"));
    }
}

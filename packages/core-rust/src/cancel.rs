//! Reasons a cancellation token can be cancelled with.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an operation was cancelled.
///
/// The reason is sticky: the first reason recorded on a token is the one every
/// observer sees, even if later cancellations are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Explicit `cancel()` by the owner.
    Requested,
    /// A newer call on the same session replaced this one.
    Superseded,
    /// The session was reset.
    Reset,
    /// The owning scope was torn down.
    Disposed,
    /// Polling was stopped while the cycle was in flight.
    PollStopped,
    /// Another item of the same batch failed under `stop_on_error`.
    BatchAborted,
}

impl CancelReason {
    /// Stable lowercase label, used in logs and serialized forms.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Superseded => "superseded",
            Self::Reset => "reset",
            Self::Disposed => "disposed",
            Self::PollStopped => "poll_stopped",
            Self::BatchAborted => "batch_aborted",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

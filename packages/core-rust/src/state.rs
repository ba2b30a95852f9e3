//! Owned state of the single-call, optimistic and poll sessions.

use crate::error::OperationError;

/// State of a single-call session.
#[derive(Debug, Clone, PartialEq)]
pub struct CallState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<OperationError>,
    /// Millis since epoch of the last settled call.
    pub last_executed_at: Option<u64>,
}

impl<T> Default for CallState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            last_executed_at: None,
        }
    }
}

/// State of an optimistic session.
///
/// `is_optimistic` is true exactly between the optimistic write and the
/// settle of the operation that confirms or rejects it.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticState<T> {
    pub confirmed: Option<T>,
    pub pending: Option<T>,
    pub is_optimistic: bool,
    pub error: Option<OperationError>,
}

impl<T> OptimisticState<T> {
    /// The value to display: the pending guess while optimistic, otherwise
    /// the last confirmed value.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        if self.is_optimistic {
            self.pending.as_ref()
        } else {
            self.confirmed.as_ref()
        }
    }
}

impl<T> Default for OptimisticState<T> {
    fn default() -> Self {
        Self {
            confirmed: None,
            pending: None,
            is_optimistic: false,
            error: None,
        }
    }
}

/// State of a poll session.
#[derive(Debug, Clone, PartialEq)]
pub struct PollState<T> {
    pub data: Option<T>,
    pub error: Option<OperationError>,
    pub is_polling: bool,
    pub in_flight: bool,
    /// Cycles that settled while the session was live.
    pub cycles: u64,
    /// Ticks skipped because the previous cycle had not settled.
    pub skipped_cycles: u64,
    pub last_polled_at: Option<u64>,
}

impl<T> Default for PollState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_polling: false,
            in_flight: false,
            cycles: 0,
            skipped_cycles: 0,
            last_polled_at: None,
        }
    }
}

//! Aggregated results of a batch run.

use crate::error::OperationError;

/// Settled result of one batch item.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemOutcome<I, O> {
    /// Position of the item in the submitted list.
    pub index: usize,
    pub item: I,
    pub result: Result<O, OperationError>,
}

impl<I, O> BatchItemOutcome<I, O> {
    #[must_use]
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Aggregate of a batch run. `successful + failed == total` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<I, O> {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Settled items, ordered by index.
    pub outcomes: Vec<BatchItemOutcome<I, O>>,
}

impl<I, O> BatchOutcome<I, O> {
    /// Builds the aggregate from settled items, in any order.
    #[must_use]
    pub fn from_outcomes(mut outcomes: Vec<BatchItemOutcome<I, O>>) -> Self {
        outcomes.sort_by_key(|o| o.index);
        let successful = outcomes.iter().filter(|o| o.success()).count();
        Self {
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
            outcomes,
        }
    }

    /// Successful items with their values.
    pub fn results(&self) -> impl Iterator<Item = (&I, &O)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (&o.item, v)))
    }

    /// Failed items with their errors.
    pub fn errors(&self) -> impl Iterator<Item = (&I, &OperationError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.item, e)))
    }
}

/// Progress of a running batch, reported after every settled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
}

impl BatchProgress {
    /// Whole-number percentage. An empty batch is complete.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = self.processed.min(self.total) * 100 / self.total;
        u8::try_from(pct).unwrap_or(100)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

/// Observable state of a batch runner.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchState<I, O> {
    pub running: bool,
    pub processed: usize,
    pub total: usize,
    pub last_outcome: Option<BatchOutcome<I, O>>,
}

impl<I, O> BatchState<I, O> {
    #[must_use]
    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            processed: self.processed,
            total: self.total,
        }
    }
}

impl<I, O> Default for BatchState<I, O> {
    fn default() -> Self {
        Self {
            running: false,
            processed: 0,
            total: 0,
            last_outcome: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_ordering() {
        let outcome = BatchOutcome::from_outcomes(vec![
            BatchItemOutcome {
                index: 2,
                item: "c",
                result: Err(OperationError::status(404, "missing")),
            },
            BatchItemOutcome {
                index: 0,
                item: "a",
                result: Ok(1),
            },
            BatchItemOutcome {
                index: 1,
                item: "b",
                result: Ok(2),
            },
        ]);

        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.successful, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(
            outcome.outcomes.iter().map(|o| o.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(outcome.results().map(|(i, _)| *i).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(outcome.errors().count(), 1);
    }

    #[test]
    fn progress_percent() {
        assert_eq!(BatchProgress { processed: 0, total: 0 }.percent(), 100);
        assert_eq!(BatchProgress { processed: 3, total: 10 }.percent(), 30);
        assert_eq!(BatchProgress { processed: 10, total: 10 }.percent(), 100);
        assert!(!BatchProgress { processed: 9, total: 10 }.is_complete());
    }
}

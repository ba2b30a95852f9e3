//! `callflow` core — operation errors, execution outcomes, retry and collaborator
//! contracts, and the state owned by each session kind.

pub mod alert;
pub mod batch;
pub mod cancel;
pub mod clock;
pub mod error;
pub mod outcome;
pub mod page;
pub mod retry;
pub mod state;

pub use alert::{Alert, AlertKind, AlertSink, AtomicErrorCounter, ErrorCounter, NoopAlertSink};
pub use batch::{BatchItemOutcome, BatchOutcome, BatchProgress, BatchState};
pub use cancel::CancelReason;
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use error::{ErrorKind, OperationError};
pub use outcome::ExecutionOutcome;
pub use page::{PageRequest, PageResponse, PageState, PaginatedState};
pub use retry::{NoRetry, RetryPolicy};
pub use state::{CallState, OptimisticState, PollState};

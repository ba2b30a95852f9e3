//! Stateful sessions built on the [`Executor`](crate::executor::Executor).
//!
//! Every session owns a [`SessionScope`] and publishes its state through a
//! `tokio::sync::watch` channel. Results of calls whose ticket went stale
//! (superseded, reset, disposed) never reach that state.

pub mod batch;
pub mod call;
pub mod optimistic;
pub mod paginated;
pub mod poll;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use callflow_core::{CallState, CancelReason, PaginatedState};
use tokio::sync::watch;

use crate::cancel::{CallTicket, SessionScope};

pub use batch::{BatchOptions, BatchRunner};
pub use call::{CallOptions, CallSession};
pub use optimistic::OptimisticSession;
pub use paginated::{PageOptions, PaginatedSession, PaginationMode};
pub use poll::{PollOptions, PollSession};

// ---------------------------------------------------------------------------
// FlagGuard
// ---------------------------------------------------------------------------

/// RAII claim on a boolean "busy" flag. The flag is released on drop, also
/// when the owning future is dropped mid-await.
#[derive(Debug)]
pub(crate) struct FlagGuard {
    flag: Arc<AtomicBool>,
}

impl FlagGuard {
    /// Claims `flag`, or returns `None` if it is already held.
    pub(crate) fn try_claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for FlagGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Settling call results into state
// ---------------------------------------------------------------------------

/// State with a `loading` flag driven by its session's calls.
pub(crate) trait LoadingState {
    fn loading_mut(&mut self) -> &mut bool;
}

impl<T> LoadingState for CallState<T> {
    fn loading_mut(&mut self) -> &mut bool {
        &mut self.loading
    }
}

impl<T> LoadingState for PaginatedState<T> {
    fn loading_mut(&mut self) -> &mut bool {
        &mut self.loading
    }
}

/// Applies a settled call to the session state.
///
/// The staleness check runs under the channel's write lock, so a call that a
/// newer one superseded cannot overwrite the newer call's state. A stale call
/// only clears `loading`, and only when no other call is in flight.
///
/// Returns the cancel reason if the ticket was stale.
pub(crate) fn settle<S: LoadingState>(
    state: &watch::Sender<S>,
    scope: &SessionScope,
    ticket: &CallTicket,
    apply: impl FnOnce(&mut S),
) -> Option<CancelReason> {
    let mut stale = None;
    state.send_if_modified(|s| {
        if let Some(reason) = ticket.token().reason() {
            stale = Some(reason);
            if scope.has_in_flight() || !*s.loading_mut() {
                return false;
            }
            *s.loading_mut() = false;
            return true;
        }
        *s.loading_mut() = false;
        apply(s);
        true
    });
    stale
}

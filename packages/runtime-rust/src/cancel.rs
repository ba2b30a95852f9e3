//! Cooperative cancellation tokens and the per-session scope that owns them.
//!
//! A [`CancellationToken`] wraps `tokio_util`'s token and adds a sticky
//! [`CancelReason`]. A [`SessionScope`] is the explicit liveness handle every
//! session holds: it hands out one token per call, cancels a call that a newer
//! one supersedes, and cancels everything on `dispose()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use callflow_core::{CancelReason, OperationError};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// CancellationToken
// ---------------------------------------------------------------------------

/// Cancel signal plus the reason it was raised with.
///
/// Clones share state. Once cancelled, a token stays cancelled, and the first
/// recorded reason is the one reported. Child tokens are cancelled with their
/// parent and report the parent's reason unless they were cancelled first.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    parent: Option<Arc<CancellationToken>>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that is cancelled whenever `self` is.
    #[must_use]
    pub fn child_token(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
            reason: Arc::new(OnceLock::new()),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Cancels with [`CancelReason::Requested`].
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Requested);
    }

    /// Cancels with `reason`. The first reason sticks.
    pub fn cancel_with(&self, reason: CancelReason) {
        if !self.inner.is_cancelled() {
            // Lost races keep the first reason.
            let _ = self.reason.set(reason);
        }
        self.inner.cancel();
    }

    /// Whether this token or an ancestor was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// The cancel reason, or `None` while the token is live.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        if !self.inner.is_cancelled() {
            return None;
        }
        Some(self.recorded_reason().unwrap_or(CancelReason::Requested))
    }

    fn recorded_reason(&self) -> Option<CancelReason> {
        self.reason
            .get()
            .copied()
            .or_else(|| self.parent.as_ref().and_then(|p| p.recorded_reason()))
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// `Err(OperationError::Cancelled)` once cancelled. Lets operations bail
    /// out between steps with `?`.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error carrying the cancel reason.
    pub fn check(&self) -> Result<(), OperationError> {
        match self.reason() {
            Some(reason) => Err(OperationError::cancelled(reason)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionScope
// ---------------------------------------------------------------------------

/// Token of one call started through a [`SessionScope`].
#[derive(Debug, Clone)]
pub struct CallTicket {
    generation: u64,
    token: CancellationToken,
}

impl CallTicket {
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// A stale ticket's results must not touch session state.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Liveness flag and in-flight call tracking for one session.
#[derive(Debug)]
pub struct SessionScope {
    root: CancellationToken,
    current: Mutex<Option<CallTicket>>,
    generation: AtomicU64,
}

impl SessionScope {
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(CancellationToken::new())
    }

    /// Scope that is also torn down when `parent` is cancelled.
    #[must_use]
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::with_root(parent.child_token())
    }

    fn with_root(root: CancellationToken) -> Self {
        Self {
            root,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// False once the scope has been disposed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.root.is_cancelled()
    }

    #[must_use]
    pub fn root(&self) -> &CancellationToken {
        &self.root
    }

    /// Starts a call. A previous call still in flight is cancelled with
    /// [`CancelReason::Superseded`].
    pub fn begin(&self) -> CallTicket {
        let ticket = CallTicket {
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
            token: self.root.child_token(),
        };
        let previous = self.current.lock().replace(ticket.clone());
        if let Some(previous) = previous {
            previous.token.cancel_with(CancelReason::Superseded);
        }
        ticket
    }

    /// Marks `ticket`'s call as settled. A newer call is left untouched.
    pub fn finish(&self, ticket: &CallTicket) {
        let mut current = self.current.lock();
        if current
            .as_ref()
            .is_some_and(|c| c.generation == ticket.generation)
        {
            *current = None;
        }
    }

    /// Whether a call began and has not finished.
    #[must_use]
    pub fn has_in_flight(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Cancels the in-flight call, if any. Returns whether one was cancelled.
    pub fn cancel_current(&self, reason: CancelReason) -> bool {
        let current = self.current.lock().take();
        match current {
            Some(ticket) => {
                ticket.token.cancel_with(reason);
                true
            }
            None => false,
        }
    }

    /// Tears the scope down. Safe to call more than once.
    pub fn dispose(&self) {
        self.cancel_current(CancelReason::Disposed);
        self.root.cancel_with(CancelReason::Disposed);
    }
}

impl Default for SessionScope {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

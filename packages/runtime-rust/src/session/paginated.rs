//! Paginated session: one page of items plus pagination metadata, in
//! replace-page or append (infinite scroll) mode.

use callflow_core::{
    CancelReason, ExecutionOutcome, PageRequest, PageResponse, PageState, PaginatedState,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::settle;
use crate::cancel::SessionScope;
use crate::error::SessionError;
use crate::executor::{ExecuteOptions, Executor};
use crate::operation::ArgOperation;

/// How a loaded page is merged into the held items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaginationMode {
    /// Every load replaces the items.
    #[default]
    Replace,
    /// Loads of pages after the first are appended to the items.
    Append,
}

/// Construction options of a [`PaginatedSession`].
#[derive(Debug)]
pub struct PageOptions<T> {
    pub mode: PaginationMode,
    /// Page size before the first load.
    pub page_size: usize,
    pub execute: ExecuteOptions<PageResponse<T>>,
}

impl<T> PageOptions<T> {
    /// Replace mode with the executor's configured page size and retries.
    #[must_use]
    pub fn new(executor: &Executor) -> Self {
        Self {
            mode: PaginationMode::Replace,
            page_size: executor.config().pagination.page_size,
            execute: executor.default_options().named("load_page"),
        }
    }

    /// Replace or append loaded pages.
    #[must_use]
    pub fn with_mode(mut self, mode: PaginationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the initial page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Execution options used by every page load.
    #[must_use]
    pub fn with_execute_options(mut self, execute: ExecuteOptions<PageResponse<T>>) -> Self {
        self.execute = execute;
        self
    }
}

/// Session over a paginated operation.
///
/// Page state is rebuilt from what each response reports. `params` given to
/// a load (filters, search terms) are remembered and reused by loads that
/// pass `None`.
pub struct PaginatedSession<P, T> {
    id: Uuid,
    executor: Executor,
    op: ArgOperation<PageRequest<P>, PageResponse<T>>,
    options: PageOptions<T>,
    scope: SessionScope,
    state: watch::Sender<PaginatedState<T>>,
    params: Mutex<P>,
}

impl<P, T> PaginatedSession<P, T>
where
    P: Clone + Default + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Session with the executor's configured page size.
    pub fn new(executor: &Executor, op: ArgOperation<PageRequest<P>, PageResponse<T>>) -> Self {
        Self::with_options(executor, op, PageOptions::new(executor))
    }

    /// Session with explicit options.
    pub fn with_options(
        executor: &Executor,
        op: ArgOperation<PageRequest<P>, PageResponse<T>>,
        options: PageOptions<T>,
    ) -> Self {
        let (state, _) = watch::channel(PaginatedState::new(options.page_size));
        Self {
            id: Uuid::new_v4(),
            executor: executor.clone(),
            op,
            options,
            scope: SessionScope::child_of(executor.root_token()),
            state,
            params: Mutex::new(P::default()),
        }
    }

    /// Identifier carried in this session's log spans.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// How loaded pages are combined.
    #[must_use]
    pub fn mode(&self) -> PaginationMode {
        self.options.mode
    }

    /// Loads page `page_index` of size `page_size`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Failed`] when the executor gives up (the held page is
    /// kept), [`SessionError::Cancelled`] when a newer load or a reset
    /// overtook this one, [`SessionError::Disposed`] on a disposed session.
    pub async fn load_page(
        &self,
        page_index: usize,
        page_size: usize,
        params: Option<P>,
    ) -> Result<(), SessionError> {
        if !self.scope.is_alive() {
            return Err(SessionError::Disposed);
        }
        let params = match params {
            Some(params) => {
                *self.params.lock() = params.clone();
                params
            }
            None => self.params.lock().clone(),
        };
        let request = PageRequest {
            page_index,
            page_size,
            params,
        };

        let ticket = self.scope.begin();
        self.state.send_modify(|s| s.loading = true);

        let options = self
            .options
            .execute
            .clone()
            .with_cancellation(ticket.token().clone());
        let span = info_span!("paginated_session", session_id = %self.id, page_index, page_size);
        let outcome = self
            .executor
            .execute(&self.op.bind(request.clone()), options)
            .instrument(span)
            .await;
        self.scope.finish(&ticket);

        let append = self.options.mode == PaginationMode::Append && page_index > 0;
        let mut result = Ok(());
        let stale = settle(&self.state, &self.scope, &ticket, |s| match outcome {
            ExecutionOutcome::Success { value, .. } => {
                if append {
                    s.page.append_response(&request, value);
                } else {
                    s.page = PageState::from_response(&request, value);
                }
                s.error = None;
            }
            ExecutionOutcome::Failure {
                error,
                kind,
                attempts,
            } => {
                s.error = Some(error.clone());
                result = Err(SessionError::Failed {
                    source: error,
                    kind,
                    attempts,
                });
            }
            ExecutionOutcome::Cancelled { reason, .. } => {
                result = Err(SessionError::Cancelled { reason });
            }
        });
        match stale {
            Some(reason) => Err(SessionError::Cancelled { reason }),
            None => result,
        }
    }

    /// Loads the next page. A no-op returning `Ok(false)` when there is none.
    ///
    /// # Errors
    ///
    /// As [`PaginatedSession::load_page`].
    pub async fn next_page(&self) -> Result<bool, SessionError> {
        let (has_next, index, size) = {
            let s = self.state.borrow();
            (s.page.has_next(), s.page.page_index(), s.page.page_size())
        };
        if !has_next {
            return Ok(false);
        }
        self.load_page(index + 1, size, None).await.map(|()| true)
    }

    /// Loads the previous page. A no-op returning `Ok(false)` on the first.
    ///
    /// # Errors
    ///
    /// As [`PaginatedSession::load_page`].
    pub async fn previous_page(&self) -> Result<bool, SessionError> {
        let (has_previous, index, size) = {
            let s = self.state.borrow();
            (s.page.has_previous(), s.page.page_index(), s.page.page_size())
        };
        if !has_previous {
            return Ok(false);
        }
        self.load_page(index - 1, size, None).await.map(|()| true)
    }

    /// Loads page `page_index` if it lies within the known page range. Page 0
    /// is always in range.
    ///
    /// # Errors
    ///
    /// As [`PaginatedSession::load_page`].
    pub async fn go_to_page(&self, page_index: usize) -> Result<bool, SessionError> {
        let (total_pages, size) = {
            let s = self.state.borrow();
            (s.page.total_pages(), s.page.page_size())
        };
        if page_index >= total_pages.max(1) {
            return Ok(false);
        }
        self.load_page(page_index, size, None).await.map(|()| true)
    }

    /// Switches to `page_size` and reloads from page 0. A zero size is
    /// ignored.
    ///
    /// # Errors
    ///
    /// As [`PaginatedSession::load_page`].
    pub async fn change_page_size(&self, page_size: usize) -> Result<bool, SessionError> {
        if page_size == 0 {
            return Ok(false);
        }
        self.load_page(0, page_size, None).await.map(|()| true)
    }

    /// Reloads with optionally new `params`: the current page in replace
    /// mode, page 0 in append mode.
    ///
    /// # Errors
    ///
    /// As [`PaginatedSession::load_page`].
    pub async fn refresh(&self, params: Option<P>) -> Result<(), SessionError> {
        let (index, size) = {
            let s = self.state.borrow();
            (s.page.page_index(), s.page.page_size())
        };
        let index = match self.options.mode {
            PaginationMode::Replace => index,
            PaginationMode::Append => 0,
        };
        self.load_page(index, size, params).await
    }

    /// Cancels any in-flight load, forgets the params and clears the page.
    pub fn reset(&self) {
        self.scope.cancel_current(CancelReason::Reset);
        *self.params.lock() = P::default();
        self.state
            .send_replace(PaginatedState::new(self.options.page_size));
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> PaginatedState<T> {
        self.state.borrow().clone()
    }

    /// Page metadata derived from the current state.
    #[must_use]
    pub fn page(&self) -> PageState<T> {
        self.state.borrow().page.clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PaginatedState<T>> {
        self.state.subscribe()
    }

    /// Cancels an in-flight load and refuses further ones.
    pub fn dispose(&self) {
        self.scope.dispose();
    }
}

impl<P, T> Drop for PaginatedSession<P, T> {
    fn drop(&mut self) {
        self.scope.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Pagination request/response shapes and the derived page state.
//!
//! The page state is always rebuilt from what the operation reports. Request
//! values are only a fallback for metadata the response leaves out, and
//! `has_next`/`has_previous` are computed, never stored.

use serde::{Deserialize, Serialize};

use crate::error::OperationError;

/// What a paginated operation is asked to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest<P> {
    /// Zero-based page index.
    pub page_index: usize,
    pub page_size: usize,
    /// Caller-defined filters, search terms, sort order.
    pub params: P,
}

/// What a paginated operation returns. Every metadata field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub page_index: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub total_pages: Option<usize>,
}

impl<T> PageResponse<T> {
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            total_count: None,
            page_index: None,
            page_size: None,
            total_pages: None,
        }
    }

    #[must_use]
    pub fn with_total_count(mut self, total_count: u64) -> Self {
        self.total_count = Some(total_count);
        self
    }

    #[must_use]
    pub fn with_page(mut self, page_index: usize, page_size: usize) -> Self {
        self.page_index = Some(page_index);
        self.page_size = Some(page_size);
        self
    }
}

/// One loaded page (or, in append mode, all pages loaded so far) plus its
/// pagination metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState<T> {
    items: Vec<T>,
    page_index: usize,
    page_size: usize,
    total_count: u64,
    total_pages: usize,
}

impl<T> PageState<T> {
    /// State before anything has been loaded.
    #[must_use]
    pub fn empty(page_size: usize) -> Self {
        Self {
            items: Vec::new(),
            page_index: 0,
            page_size,
            total_count: 0,
            total_pages: 0,
        }
    }

    /// Builds the state for `response`, falling back to `request` for any
    /// metadata the response omits.
    ///
    /// Without a `total_count`, the total is taken to be everything up to and
    /// including this page, so `has_next` is false.
    #[must_use]
    pub fn from_response<P>(request: &PageRequest<P>, response: PageResponse<T>) -> Self {
        let page_index = response.page_index.unwrap_or(request.page_index);
        let page_size = response.page_size.unwrap_or(request.page_size);
        let total_count = response.total_count.unwrap_or_else(|| {
            let before = page_index.saturating_mul(page_size);
            to_u64(before.saturating_add(response.items.len()))
        });
        let total_pages = response
            .total_pages
            .unwrap_or_else(|| pages_for(total_count, page_size));

        Self {
            items: response.items,
            page_index,
            page_size,
            total_count,
            total_pages,
        }
    }

    /// Appends `response`'s items to the ones already held and takes the
    /// metadata from `response`.
    pub fn append_response<P>(&mut self, request: &PageRequest<P>, response: PageResponse<T>) {
        let mut next = Self::from_response(request, response);
        let mut items = std::mem::take(&mut self.items);
        items.append(&mut next.items);
        next.items = items;
        *self = next;
    }

    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    #[must_use]
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page_index.saturating_add(1) < self.total_pages
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.page_index > 0
    }
}

/// Observable state of a paginated session.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedState<T> {
    pub page: PageState<T>,
    pub loading: bool,
    pub error: Option<OperationError>,
}

impl<T> PaginatedState<T> {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page: PageState::empty(page_size),
            loading: false,
            error: None,
        }
    }
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn pages_for(total_count: u64, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    usize::try_from(total_count.div_ceil(to_u64(page_size))).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn request(page_index: usize, page_size: usize) -> PageRequest<()> {
        PageRequest {
            page_index,
            page_size,
            params: (),
        }
    }

    #[test]
    fn first_page_of_three() {
        let response = PageResponse::new((0..20).collect::<Vec<u32>>())
            .with_total_count(45)
            .with_page(0, 20);
        let state = PageState::from_response(&request(0, 20), response);

        assert_eq!(state.items().len(), 20);
        assert_eq!(state.total_pages(), 3);
        assert!(state.has_next());
        assert!(!state.has_previous());
    }

    #[test]
    fn last_page_has_no_next() {
        let response = PageResponse::new(vec![1, 2, 3, 4, 5]).with_total_count(45);
        let state = PageState::from_response(&request(2, 20), response);

        assert_eq!(state.page_index(), 2);
        assert!(!state.has_next());
        assert!(state.has_previous());
    }

    #[test]
    fn response_metadata_wins_over_request() {
        let response = PageResponse::new(vec![1, 2])
            .with_total_count(12)
            .with_page(1, 10);
        let state = PageState::from_response(&request(4, 50), response);

        assert_eq!(state.page_index(), 1);
        assert_eq!(state.page_size(), 10);
        assert_eq!(state.total_pages(), 2);
    }

    #[test]
    fn missing_total_counts_items_seen_so_far() {
        let state = PageState::from_response(&request(1, 10), PageResponse::new(vec![0; 4]));
        assert_eq!(state.total_count(), 14);
        assert_eq!(state.total_pages(), 2);
        assert!(!state.has_next());
    }

    #[test]
    fn append_concatenates_items() {
        let mut state = PageState::from_response(
            &request(0, 3),
            PageResponse::new(vec![1, 2, 3]).with_total_count(5),
        );
        state.append_response(
            &request(1, 3),
            PageResponse::new(vec![4, 5]).with_total_count(5),
        );

        assert_eq!(state.items(), &[1, 2, 3, 4, 5]);
        assert_eq!(state.page_index(), 1);
        assert!(!state.has_next());
    }

    #[test]
    fn zero_page_size_has_no_pages() {
        let state = PageState::from_response(&request(0, 0), PageResponse::<u8>::new(vec![]));
        assert_eq!(state.total_pages(), 0);
        assert!(!state.has_next());
    }

    #[test]
    fn response_deserializes_from_camel_case_json() {
        let json = r#"{"items":[{"id":1}],"totalCount":45,"pageSize":20}"#;
        let response: PageResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert_eq!(response.total_count, Some(45));
        assert_eq!(response.page_size, Some(20));
        assert_eq!(response.page_index, None);
        assert_eq!(response.items.len(), 1);
    }

    proptest! {
        #[test]
        fn navigation_flags_are_derived(
            total in 0u64..10_000,
            page_size in 1usize..200,
            page_index in 0usize..100,
        ) {
            let response = PageResponse::<u8>::new(vec![]).with_total_count(total);
            let state = PageState::from_response(&request(page_index, page_size), response);
            let pages = usize::try_from(total.div_ceil(page_size as u64)).unwrap();

            prop_assert_eq!(state.total_pages(), pages);
            prop_assert_eq!(state.has_next(), page_index + 1 < pages);
            prop_assert_eq!(state.has_previous(), page_index > 0);
        }
    }
}

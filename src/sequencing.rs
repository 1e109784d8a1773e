//! Request sequencing for last-request-wins lookups.
//!
//! Search-as-you-type and the existing-order check fire a request on every
//! input change. Responses can arrive out of order; each request carries a
//! token and only the most recently issued token may apply its result.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a token; every previously issued token becomes stale.
    pub fn issue(&self) -> RequestToken {
        RequestToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Mark all outstanding requests stale without starting a new one.
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }
}

/// A search input with a result dropdown.
#[derive(Debug)]
pub struct SearchBox<T> {
    query: String,
    results: Vec<T>,
    open: bool,
    seq: RequestSequencer,
}

impl<T> Default for SearchBox<T> {
    fn default() -> Self {
        Self {
            query: String::new(),
            results: Vec::new(),
            open: false,
            seq: RequestSequencer::new(),
        }
    }
}

impl<T> SearchBox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn results(&self) -> &[T] {
        &self.results
    }

    pub fn is_open(&self) -> bool {
        self.open && !self.results.is_empty()
    }

    /// Record the new input. Returns the token to tag the backend request
    /// with, or `None` when the input is empty (results cleared, nothing to
    /// fetch).
    pub fn begin(&mut self, query: &str) -> Option<RequestToken> {
        self.query = query.to_string();
        if query.trim().is_empty() {
            self.seq.invalidate();
            self.results.clear();
            self.open = false;
            return None;
        }
        Some(self.seq.issue())
    }

    /// Apply results for `token`. Stale results are dropped and `false` is
    /// returned.
    pub fn resolve(&mut self, token: RequestToken, results: Vec<T>) -> bool {
        if !self.seq.is_current(token) {
            debug!(token = token.value(), "discarding stale search results");
            return false;
        }
        self.results = results;
        self.open = true;
        true
    }

    /// Close the dropdown and forget the input (after a pick).
    pub fn reset(&mut self) {
        self.seq.invalidate();
        self.query.clear();
        self.results.clear();
        self.open = false;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_latest_token_is_current() {
        let seq = RequestSequencer::new();
        let first = seq.issue();
        let second = seq.issue();
        assert!(!seq.is_current(first));
        assert!(seq.is_current(second));
        seq.invalidate();
        assert!(!seq.is_current(second));
    }

    #[test]
    fn test_search_box_discards_out_of_order_response() {
        let mut search: SearchBox<&str> = SearchBox::new();
        let slow = search.begin("mu").unwrap();
        let fast = search.begin("mug").unwrap();

        assert!(search.resolve(fast, vec!["Mug", "Mug Set"]));
        assert!(!search.resolve(slow, vec!["Mustard"]));
        assert_eq!(search.results(), &["Mug", "Mug Set"]);
        assert!(search.is_open());
    }

    #[test]
    fn test_search_box_empty_query_clears_and_cancels() {
        let mut search: SearchBox<i32> = SearchBox::new();
        let pending = search.begin("ah").unwrap();
        assert!(search.begin("").is_none());
        assert!(!search.resolve(pending, vec![1, 2]));
        assert!(search.results().is_empty());
        assert!(!search.is_open());
    }
}

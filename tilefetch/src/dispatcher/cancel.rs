//! Cancellation by URL.
//!
//! A cancel removes every request whose (rewritten) URL equals the given
//! one, whether queued or running. There is no per-request handle: two
//! submissions of the same URL are both cancelled by one call.

use tracing::debug;

use super::Dispatcher;
use crate::error::FetchError;

impl Dispatcher {
    /// Cancels all queued and running requests for `url`.
    ///
    /// Each removed request receives `Cancelled` before this returns.
    /// Requests that already completed are unaffected, and a URL with no
    /// match is a no-op. Returns the number of requests cancelled.
    pub fn cancel(&self, url: &str) -> usize {
        let url = self.inner.rewrite(url);

        let (cancelled, launches) = {
            let mut state = self.inner.state.lock();
            let cancelled = state.cancel_matching(&url);
            // Cancelled running requests freed their slots.
            let launches = state.promote(
                self.inner.config.max_requests,
                self.inner.config.max_requests_per_host,
            );
            (cancelled, launches)
        };
        self.inner.launch(launches);

        if cancelled.is_empty() {
            debug!(url = %url, "Cancel matched no pending request");
            return 0;
        }

        let count = cancelled.len();
        self.inner.metrics.requests_cancelled(count as u64);
        for (id, completion) in cancelled {
            debug!(request = %id, url = %url, "Request cancelled");
            completion.deliver(Err(FetchError::cancelled(url.as_str())));
        }
        count
    }
}

//! Queued and Running request sets.
//!
//! A request lives in exactly one of the two sets until it reaches a
//! terminal state, at which point it is removed and its [`Completion`] is
//! handed back to the caller of the removing method. Whoever removes the
//! request delivers its result, which makes delivery exactly-once.
//!
//! The state is not thread-safe; the dispatcher wraps it in a mutex and
//! never holds that mutex while delivering results or doing I/O.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::request::{Completion, RequestId};
use crate::transport::host_of;

/// A request waiting for a free slot.
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub id: RequestId,
    pub url: String,
    pub host: Option<String>,
    pub completion: Completion,
    pub enqueued_at: Instant,
}

impl QueuedRequest {
    pub fn new(url: String, completion: Completion) -> Self {
        Self {
            id: RequestId::next(),
            host: host_of(&url),
            url,
            completion,
            enqueued_at: Instant::now(),
        }
    }
}

/// A request that has been handed to a worker.
#[derive(Debug)]
pub(crate) struct RunningRequest {
    pub url: String,
    pub host: Option<String>,
    pub completion: Completion,
    pub token: CancellationToken,
    pub started_at: Instant,
}

/// What a worker needs to start a promoted request.
#[derive(Debug, Clone)]
pub(crate) struct Launch {
    pub id: RequestId,
    pub url: String,
    pub token: CancellationToken,
    pub waited: Duration,
}

/// The Queued and Running sets plus per-host bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct DispatchState {
    queued: VecDeque<QueuedRequest>,
    running: HashMap<RequestId, RunningRequest>,
    running_per_host: HashMap<String, usize>,
    shut_down: bool,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    /// Adds a request to the back of the queue.
    pub fn enqueue(&mut self, request: QueuedRequest) {
        self.queued.push_back(request);
    }

    /// Moves queued requests to Running while slots are free.
    ///
    /// Requests are considered in FIFO order. A request whose host is at
    /// its limit stays queued without blocking requests to other hosts.
    pub fn promote(&mut self, max_requests: usize, max_per_host: usize) -> Vec<Launch> {
        let mut launches = Vec::new();
        if self.shut_down {
            return launches;
        }

        let mut index = 0;
        while index < self.queued.len() && self.running.len() < max_requests {
            let host_full = self.queued[index]
                .host
                .as_ref()
                .is_some_and(|host| self.host_running(host) >= max_per_host);
            if host_full {
                index += 1;
                continue;
            }

            let Some(request) = self.queued.remove(index) else {
                break;
            };
            let token = CancellationToken::new();
            if let Some(host) = &request.host {
                *self.running_per_host.entry(host.clone()).or_insert(0) += 1;
            }
            launches.push(Launch {
                id: request.id,
                url: request.url.clone(),
                token: token.clone(),
                waited: request.enqueued_at.elapsed(),
            });
            self.running.insert(
                request.id,
                RunningRequest {
                    url: request.url,
                    host: request.host,
                    completion: request.completion,
                    token,
                    started_at: Instant::now(),
                },
            );
        }

        launches
    }

    /// Removes a running request that finished on its own.
    ///
    /// Returns `None` if it was already removed by cancellation.
    pub fn finish(&mut self, id: RequestId) -> Option<RunningRequest> {
        let request = self.running.remove(&id)?;
        self.release_host(request.host.as_deref());
        Some(request)
    }

    /// Removes every request for `url`, running ones first.
    ///
    /// Running requests have their token cancelled, which aborts the
    /// transmission in the worker.
    pub fn cancel_matching(&mut self, url: &str) -> Vec<(RequestId, Completion)> {
        let running_ids: Vec<RequestId> = self
            .running
            .iter()
            .filter(|(_, r)| r.url == url)
            .map(|(id, _)| *id)
            .collect();

        let mut cancelled = Vec::new();
        for id in running_ids {
            if let Some(request) = self.running.remove(&id) {
                request.token.cancel();
                self.release_host(request.host.as_deref());
                cancelled.push((id, request.completion));
            }
        }

        let (matching, remaining): (VecDeque<_>, VecDeque<_>) =
            self.queued.drain(..).partition(|r| r.url == url);
        self.queued = remaining;
        cancelled.extend(matching.into_iter().map(|r| (r.id, r.completion)));

        cancelled
    }

    /// Marks the state shut down and removes every request.
    pub fn drain(&mut self) -> Vec<(RequestId, String, Completion)> {
        self.shut_down = true;

        let mut drained = Vec::with_capacity(self.running.len() + self.queued.len());
        for (id, request) in self.running.drain() {
            request.token.cancel();
            drained.push((id, request.url, request.completion));
        }
        self.running_per_host.clear();
        drained.extend(self.queued.drain(..).map(|r| (r.id, r.url, r.completion)));
        drained
    }

    fn host_running(&self, host: &str) -> usize {
        self.running_per_host.get(host).copied().unwrap_or(0)
    }

    fn release_host(&mut self, host: Option<&str>) {
        let Some(host) = host else {
            return;
        };
        if let Some(count) = self.running_per_host.get_mut(host) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.running_per_host.remove(host);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> QueuedRequest {
        QueuedRequest::new(url.to_string(), Completion::callback(|_| {}))
    }

    #[test]
    fn test_promote_respects_global_limit() {
        let mut state = DispatchState::new();
        for i in 0..5 {
            state.enqueue(request(&format!("https://a{}.example/t", i)));
        }

        let launches = state.promote(3, 5);

        assert_eq!(launches.len(), 3);
        assert_eq!(state.running_len(), 3);
        assert_eq!(state.queued_len(), 2);
    }

    #[test]
    fn test_promote_is_fifo() {
        let mut state = DispatchState::new();
        state.enqueue(request("https://a.example/1"));
        state.enqueue(request("https://b.example/2"));
        state.enqueue(request("https://c.example/3"));

        let launches = state.promote(2, 5);

        let urls: Vec<_> = launches.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example/1", "https://b.example/2"]);
    }

    #[test]
    fn test_promote_respects_per_host_limit() {
        let mut state = DispatchState::new();
        for i in 0..3 {
            state.enqueue(request(&format!("https://busy.example/{}", i)));
        }
        state.enqueue(request("https://other.example/x"));

        let launches = state.promote(10, 2);

        assert_eq!(launches.len(), 3);
        assert_eq!(state.queued_len(), 1);
        assert!(launches.iter().any(|l| l.url == "https://other.example/x"));
    }

    #[test]
    fn test_finish_frees_host_slot() {
        let mut state = DispatchState::new();
        state.enqueue(request("https://busy.example/1"));
        state.enqueue(request("https://busy.example/2"));

        let first = state.promote(10, 1);
        assert_eq!(first.len(), 1);

        assert!(state.finish(first[0].id).is_some());
        assert!(state.finish(first[0].id).is_none());

        let second = state.promote(10, 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].url, "https://busy.example/2");
    }

    #[test]
    fn test_cancel_matching_hits_both_sets() {
        let mut state = DispatchState::new();
        let url = "https://tiles.example/dup";
        state.enqueue(request(url));
        state.enqueue(request("https://tiles.example/other"));
        state.enqueue(request(url));
        let launches = state.promote(1, 5);
        assert_eq!(launches[0].url, url);

        let cancelled = state.cancel_matching(url);

        assert_eq!(cancelled.len(), 2);
        assert!(launches[0].token.is_cancelled());
        assert_eq!(state.running_len(), 0);
        assert_eq!(state.queued_len(), 1);
        // Cancelled running request can no longer finish
        assert!(state.finish(launches[0].id).is_none());
    }

    #[test]
    fn test_cancel_without_match_is_noop() {
        let mut state = DispatchState::new();
        state.enqueue(request("https://tiles.example/a"));
        state.promote(5, 5);

        assert!(state.cancel_matching("https://tiles.example/b").is_empty());
        assert_eq!(state.running_len(), 1);
    }

    #[test]
    fn test_drain_empties_and_blocks_promotion() {
        let mut state = DispatchState::new();
        for i in 0..8 {
            state.enqueue(request(&format!("https://tiles.example/{}", i)));
        }
        let launches = state.promote(3, 5);

        let drained = state.drain();

        assert_eq!(drained.len(), 8);
        assert!(launches.iter().all(|l| l.token.is_cancelled()));
        assert!(state.is_shut_down());
        assert_eq!(state.running_len() + state.queued_len(), 0);

        state.enqueue(request("https://tiles.example/late"));
        assert!(state.promote(3, 5).is_empty());
    }
}

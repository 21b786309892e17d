//! Request dispatcher.
//!
//! The [`Dispatcher`] accepts resource requests, runs them on a bounded
//! pool of tokio tasks and delivers exactly one terminal result per
//! request.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Dispatcher                            │
//! │                                                                  │
//! │  submit(url) ──► rewrite ──► ┌────────┐  slot free  ┌─────────┐  │
//! │                              │ Queued │ ──────────► │ Running │  │
//! │  cancel(url) ──► rewrite ──► └────────┘             └────┬────┘  │
//! │        │            removes matches from both sets       │       │
//! │        ▼                                                 ▼       │
//! │   Cancelled                                   worker task:       │
//! │                                               cache ─► transport │
//! │                                                          │       │
//! │                                       Succeeded / Failed ◄┘       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both sets live behind one mutex. A request reaches its terminal state
//! when it is removed from the sets, either by its worker or by
//! cancellation; only the remover delivers, so a natural completion that
//! gets there first wins and the cancellation becomes a no-op for it.
//! Results are always delivered after the lock is released, on whatever
//! thread removed the request.
//!
//! # Example
//!
//! ```ignore
//! use tilefetch::config::TransportConfig;
//! use tilefetch::dispatcher::Dispatcher;
//!
//! let dispatcher = Dispatcher::new(
//!     TransportConfig::default().with_cache("/var/cache/tiles", 30 * 1024 * 1024),
//! )?;
//!
//! let accepted = dispatcher.submit("https://tiles.example/14/8192/5461.pbf", |result| {
//!     match result {
//!         Ok(payload) => println!("{} bytes", payload.len()),
//!         Err(e) => eprintln!("failed: {}", e),
//!     }
//! });
//! assert!(accepted);
//!
//! dispatcher.cancel("https://tiles.example/14/8192/5461.pbf");
//! dispatcher.shutdown();
//! ```

mod builder;
mod cancel;
mod request;
mod rewrite;
mod state;
mod worker;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

pub use builder::DispatcherBuilder;
pub use request::{FetchOutcome, FetchResult, RequestId, ResponseHandle, TerminalState};
pub use rewrite::{QueryParamRewriter, UrlRewriter};

use self::request::Completion;
use self::state::{DispatchState, Launch, QueuedRequest};
use crate::cache::ResponseCache;
use crate::config::TransportConfig;
use crate::error::{ConfigError, FetchError};
use crate::telemetry::{DispatcherMetrics, TelemetrySnapshot};
use crate::transport::HttpTransport;

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the dispatcher handle and its worker tasks.
pub(crate) struct Inner {
    config: TransportConfig,
    transport: RwLock<Option<Arc<dyn HttpTransport>>>,
    cache: Option<ResponseCache>,
    rewriter: Option<Arc<dyn UrlRewriter>>,
    metrics: Arc<DispatcherMetrics>,
    runtime: Handle,
    state: Mutex<DispatchState>,
}

impl Inner {
    fn rewrite(&self, url: &str) -> String {
        match &self.rewriter {
            Some(rewriter) => rewriter.rewrite(url),
            None => url.to_string(),
        }
    }

    fn transport(&self) -> Option<Arc<dyn HttpTransport>> {
        self.transport.read().clone()
    }

    /// Spawns a worker task for each promoted request.
    fn launch(self: &Arc<Self>, launches: Vec<Launch>) {
        for launch in launches {
            self.runtime.spawn(worker::run(Arc::clone(self), launch));
        }
    }

    /// Queues a request and promotes what fits.
    ///
    /// Hands the completion back if the dispatcher is shut down.
    fn enqueue(self: &Arc<Self>, url: String, completion: Completion) -> Result<RequestId, Completion> {
        let (id, launches) = {
            let mut state = self.state.lock();
            if state.is_shut_down() {
                return Err(completion);
            }
            let request = QueuedRequest::new(url, completion);
            let id = request.id;
            state.enqueue(request);
            let launches = state.promote(self.config.max_requests, self.config.max_requests_per_host);
            (id, launches)
        };

        self.metrics.request_submitted();
        self.launch(launches);
        Ok(id)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Owns the request sets, the transport and the optional response cache.
///
/// Dropping the dispatcher shuts it down.
pub struct Dispatcher {
    inner: Arc<Inner>,
    owned_runtime: Option<Runtime>,
}

impl Dispatcher {
    /// Builds a dispatcher with the production transport.
    ///
    /// Invalid configuration is the only fatal error. A cache directory that
    /// cannot be used, or TLS hardening that cannot be applied, is logged and
    /// the dispatcher falls back to running uncached or with default TLS.
    pub fn new(config: TransportConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    /// Starts a builder for injecting a transport, cache, URL rewriter or
    /// runtime.
    pub fn builder(config: TransportConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Submits a request; `on_result` receives its terminal result exactly once.
    ///
    /// Returns `false`, without invoking `on_result`, if the dispatcher has
    /// been shut down. The callback may run on any thread.
    pub fn submit<F>(&self, url: &str, on_result: F) -> bool
    where
        F: FnOnce(FetchResult) + Send + 'static,
    {
        let url = self.inner.rewrite(url);
        match self.inner.enqueue(url, Completion::callback(on_result)) {
            Ok(id) => {
                debug!(request = %id, "Request submitted");
                true
            }
            Err(_) => {
                self.inner.metrics.request_rejected();
                debug!("Request rejected: dispatcher is shut down");
                false
            }
        }
    }

    /// Submits a request and returns a future for its result.
    ///
    /// After shutdown the handle resolves to [`FetchError::ShutDown`].
    pub fn fetch(&self, url: &str) -> ResponseHandle {
        let url = self.inner.rewrite(url);
        let (handle, completion) = ResponseHandle::channel(url.clone());
        match self.inner.enqueue(url, completion) {
            Ok(id) => {
                debug!(request = %id, "Request submitted");
                handle
            }
            Err(_) => {
                self.inner.metrics.request_rejected();
                ResponseHandle::ready(handle.url().to_string(), Err(FetchError::ShutDown))
            }
        }
    }

    /// Cancels every request and rejects further submissions.
    ///
    /// Each pending request receives `Cancelled` before this returns. The
    /// transport and its connection pool are released. Calling it again is
    /// a no-op.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.is_shut_down() {
                return;
            }
            state.drain()
        };

        let count = drained.len();
        self.inner.metrics.requests_cancelled(count as u64);
        for (id, url, completion) in drained {
            debug!(request = %id, url = %url, "Cancelled by shutdown");
            completion.deliver(Err(FetchError::cancelled(url)));
        }

        self.inner.transport.write().take();
        info!(cancelled = count, "Dispatcher shut down");
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().is_shut_down()
    }

    /// Number of requests currently transmitting.
    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running_len()
    }

    /// Number of requests waiting for a slot.
    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queued_len()
    }

    /// Running plus queued requests.
    pub fn outstanding(&self) -> usize {
        let state = self.inner.state.lock();
        state.running_len() + state.queued_len()
    }

    /// Point-in-time copy of the dispatcher counters.
    pub fn metrics(&self) -> TelemetrySnapshot {
        self.inner.metrics.snapshot()
    }

    /// The response cache, if caching is enabled.
    pub fn cache(&self) -> Option<&ResponseCache> {
        self.inner.cache.as_ref()
    }

    /// The configuration the dispatcher was built with.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.owned_runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.running_count())
            .field("queued", &self.queued_count())
            .field("cache", &self.inner.cache)
            .finish()
    }
}

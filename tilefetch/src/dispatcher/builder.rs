//! Construction of a [`Dispatcher`] with injectable parts.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

use super::rewrite::UrlRewriter;
use super::state::DispatchState;
use super::{Dispatcher, Inner};
use crate::cache::ResponseCache;
use crate::config::TransportConfig;
use crate::error::ConfigError;
use crate::telemetry::DispatcherMetrics;
use crate::transport::{HttpTransport, ReqwestTransport};

/// Cache selection for the builder.
enum CacheChoice {
    FromConfig,
    Explicit(ResponseCache),
    Disabled,
}

/// Builder for [`Dispatcher`].
///
/// By default the dispatcher uses [`ReqwestTransport`], opens the disk cache
/// named by the configuration, and runs its workers on the ambient tokio
/// runtime, or on a runtime of its own when called outside one.
pub struct DispatcherBuilder {
    config: TransportConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    cache: CacheChoice,
    rewriter: Option<Arc<dyn UrlRewriter>>,
    runtime: Option<Handle>,
    metrics: Option<Arc<DispatcherMetrics>>,
}

impl DispatcherBuilder {
    pub(super) fn new(config: TransportConfig) -> Self {
        Self {
            config,
            transport: None,
            cache: CacheChoice::FromConfig,
            rewriter: None,
            runtime: None,
            metrics: None,
        }
    }

    /// Uses the given transport instead of building a reqwest client.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses the given response cache, ignoring the configured directory.
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = CacheChoice::Explicit(cache);
        self
    }

    /// Disables response caching.
    pub fn without_cache(mut self) -> Self {
        self.cache = CacheChoice::Disabled;
        self
    }

    /// Rewrites every URL before it is submitted or cancelled.
    pub fn with_url_rewriter(mut self, rewriter: impl UrlRewriter) -> Self {
        self.rewriter = Some(Arc::new(rewriter));
        self
    }

    /// Runs worker tasks on the given runtime.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Records into shared metrics, e.g. ones a progress display polls.
    pub fn with_metrics(mut self, metrics: Arc<DispatcherMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the configuration and assembles the dispatcher.
    pub fn build(self) -> Result<Dispatcher, ConfigError> {
        self.config.validate()?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };

        let cache = match self.cache {
            CacheChoice::FromConfig => ResponseCache::configure(
                self.config.cache_directory.as_deref(),
                self.config.cache_max_bytes,
            ),
            CacheChoice::Explicit(cache) => Some(cache),
            CacheChoice::Disabled => None,
        };

        let (runtime, owned_runtime) = match self.runtime {
            Some(handle) => (handle, None),
            None => match Handle::try_current() {
                Ok(handle) => (handle, None),
                Err(_) => {
                    debug!("No ambient tokio runtime, starting a dispatcher runtime");
                    let runtime = build_runtime(self.config.max_requests)?;
                    (runtime.handle().clone(), Some(runtime))
                }
            },
        };

        info!(
            max_requests = self.config.max_requests,
            max_requests_per_host = self.config.max_requests_per_host,
            cache = cache.is_some(),
            "Dispatcher started"
        );

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                config: self.config,
                transport: RwLock::new(Some(transport)),
                cache,
                rewriter: self.rewriter,
                metrics: self.metrics.unwrap_or_default(),
                runtime,
                state: Mutex::new(DispatchState::new()),
            }),
            owned_runtime,
        })
    }
}

fn build_runtime(max_requests: usize) -> Result<Runtime, ConfigError> {
    let workers = max_requests.min(
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4),
    );
    Ok(Builder::new_multi_thread()
        .worker_threads(workers.max(1))
        .thread_name("tilefetch-worker")
        .enable_all()
        .build()?)
}

//! HTTP transport abstraction for testability.
//!
//! The dispatcher owns caching, TLS policy and cancellation; the transport
//! only moves bytes. Non-success statuses are returned as responses, not
//! errors, so the caller can act on `304 Not Modified`.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use super::tls::{SecureTransport, TlsCapabilities, TlsPlan};
use crate::config::TransportConfig;
use crate::error::{ConfigError, FetchError};

/// Idle pooled connections are kept this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// =============================================================================
// Request / Response
// =============================================================================

/// An outbound GET request.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Absolute URL of the resource.
    pub url: String,
    /// Extra request headers (conditional validators, etc.).
    pub headers: HeaderMap,
}

impl HttpRequest {
    /// Creates a GET request without extra headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header, replacing any previous value.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns a header value as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A complete response with its body read into memory.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Returns a header value as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true for `304 Not Modified`.
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Extracts the host of a URL, used for per-host concurrency limits.
pub fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Pluggable low-level HTTP transport.
///
/// Implementations must be cancel-safe: dropping the returned future aborts
/// the transmission.
pub trait HttpTransport: Send + Sync + 'static {
    /// Performs the request and reads the whole body.
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, FetchError>>;
}

// =============================================================================
// Reqwest Transport
// =============================================================================

/// Production transport backed by a pooled reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
    tls_plan: TlsPlan,
}

impl ReqwestTransport {
    /// Builds a client from the transport configuration, detecting TLS
    /// capabilities of the linked library.
    pub fn new(config: &TransportConfig) -> Result<Self, ConfigError> {
        Self::with_capabilities(config, &TlsCapabilities::detect())
    }

    /// Builds a client using explicit TLS capabilities.
    pub fn with_capabilities(
        config: &TransportConfig,
        capabilities: &TlsCapabilities,
    ) -> Result<Self, ConfigError> {
        let builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .timeout(config.total_timeout())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(config.max_requests_per_host)
            .user_agent(config.user_agent.clone());

        let (builder, tls_plan) =
            SecureTransport::configure(builder, config.minimum_tls_version, capabilities);

        let client = builder
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        debug!(
            connect_timeout_ms = config.connect_timeout.as_millis() as u64,
            read_timeout_ms = config.read_timeout.as_millis() as u64,
            tls_plan = ?tls_plan,
            "Created HTTP transport"
        );

        Ok(Self { client, tls_plan })
    }

    /// Returns the TLS plan applied to this client.
    pub fn tls_plan(&self) -> &TlsPlan {
        &self.tls_plan
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, FetchError>> {
        Box::pin(async move {
            let HttpRequest { url, headers } = request;

            let response = self
                .client
                .get(&url)
                .headers(headers)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&url, &e))?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| FetchError::from_reqwest(&url, &e))?;

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    type Reply = Result<HttpResponse, FetchError>;

    /// Scriptable transport for dispatcher and cache tests.
    ///
    /// By default every URL answers `200` with the URL as body. Requests can
    /// be held at a gate until the test releases them.
    pub struct MockTransport {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<HttpRequest>>,
        gate: Option<Arc<Semaphore>>,
        delay: Option<Duration>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct InFlight(Arc<AtomicUsize>);

    impl Drop for InFlight {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                replies: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                gate: None,
                delay: None,
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Holds every request until `release` is called.
        pub fn gated() -> Self {
            Self {
                gate: Some(Arc::new(Semaphore::new(0))),
                ..Self::new()
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Queues a reply for `url`. The last queued reply repeats.
        pub fn reply(&self, url: &str, reply: Reply) {
            self.replies
                .lock()
                .entry(url.to_string())
                .or_default()
                .push_back(reply);
        }

        /// Lets `n` gated requests proceed.
        pub fn release(&self, n: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(n);
            }
        }

        pub fn calls(&self) -> Vec<HttpRequest> {
            self.calls.lock().clone()
        }

        pub fn call_count(&self, url: &str) -> usize {
            self.calls.lock().iter().filter(|r| r.url == url).count()
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        fn next_reply(&self, url: &str) -> Reply {
            let mut replies = self.replies.lock();
            match replies.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) if !queue.is_empty() => queue[0].clone(),
                _ => Ok(HttpResponse::new(200, url.as_bytes().to_vec())),
            }
        }
    }

    impl HttpTransport for MockTransport {
        fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, FetchError>> {
            Box::pin(async move {
                self.calls.lock().push(request.clone());

                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                let _guard = InFlight(Arc::clone(&self.in_flight));

                if let Some(gate) = &self.gate {
                    gate.acquire().await.unwrap().forget();
                }
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }

                self.next_reply(&request.url)
            })
        }
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://Tiles.Example/z/x/y.pbf"),
            Some("tiles.example".to_string())
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_response_helpers() {
        let response = HttpResponse::new(304, Vec::new()).with_header("ETag", "\"abc\"");
        assert!(response.is_not_modified());
        assert!(!response.is_success());
        assert_eq!(response.header("etag"), Some("\"abc\""));
    }

    #[test]
    fn test_request_headers() {
        let request = HttpRequest::get("https://tiles.example/a").with_header(
            reqwest::header::IF_NONE_MATCH,
            HeaderValue::from_static("\"v1\""),
        );
        assert_eq!(request.header("if-none-match"), Some("\"v1\""));
    }

    #[test]
    fn test_reqwest_transport_builds_with_defaults() {
        let transport = ReqwestTransport::new(&TransportConfig::default()).unwrap();
        assert!(!transport.tls_plan().is_restricted());
    }

    // =========================================================================
    // Reqwest error mapping against local sockets
    // =========================================================================

    fn short_timeouts() -> TransportConfig {
        TransportConfig::default()
            .with_connect_timeout(Duration::from_secs(1))
            .with_write_timeout(Duration::from_millis(300))
            .with_read_timeout(Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let transport = ReqwestTransport::new(&short_timeouts()).unwrap();
        let url = format!("http://{}/tile.pbf", addr);
        let err = transport.execute(HttpRequest::get(&url)).await.unwrap_err();

        assert!(err.is_timeout(), "expected timeout, got {:?}", err);
        assert_eq!(err, FetchError::Timeout { url });
        server.abort();
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let transport = ReqwestTransport::new(&short_timeouts()).unwrap();
        let url = format!("http://{}/tile.pbf", addr);
        let err = transport.execute(HttpRequest::get(&url)).await.unwrap_err();

        assert!(
            matches!(&err, FetchError::Transport { url: u, .. } if *u == url),
            "expected transport error, got {:?}",
            err
        );
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_error_status_is_returned_as_response() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\nConnection: close\r\n\r\nmissing")
                .await;
        });

        let transport = ReqwestTransport::new(&short_timeouts()).unwrap();
        let response = transport
            .execute(HttpRequest::get(format!("http://{}/tile.pbf", addr)))
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(&response.body[..], b"missing");
    }

    #[tokio::test]
    async fn test_mock_default_reply_echoes_url() {
        let mock = MockTransport::new();
        let response = mock
            .execute(HttpRequest::get("https://tiles.example/1"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"https://tiles.example/1");
        assert_eq!(mock.call_count("https://tiles.example/1"), 1);
    }

    #[tokio::test]
    async fn test_mock_reply_sequence() {
        let mock = MockTransport::new();
        let url = "https://tiles.example/seq";
        mock.reply(url, Ok(HttpResponse::new(500, Vec::new())));
        mock.reply(url, Ok(HttpResponse::new(200, b"ok".to_vec())));

        assert_eq!(mock.execute(HttpRequest::get(url)).await.unwrap().status, 500);
        assert_eq!(mock.execute(HttpRequest::get(url)).await.unwrap().status, 200);
        assert_eq!(mock.execute(HttpRequest::get(url)).await.unwrap().status, 200);
    }
}

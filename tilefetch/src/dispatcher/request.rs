//! Request identity, results and completion delivery.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::FetchError;

/// Terminal result of a request: the payload or the failure cause.
pub type FetchResult = Result<Bytes, FetchError>;

// =============================================================================
// Request ID
// =============================================================================

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a submitted request.
///
/// Used internally and in logs. Callers cancel by URL, not by ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

// =============================================================================
// Terminal State
// =============================================================================

/// Final state of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalState {
    /// A payload was delivered.
    Succeeded,
    /// The request failed (transport, timeout or HTTP status).
    Failed,
    /// The request was cancelled before or during transmission.
    Cancelled,
}

impl TerminalState {
    /// Classifies a result.
    pub fn of(result: &FetchResult) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(e) if e.is_cancelled() => Self::Cancelled,
            Err(_) => Self::Failed,
        }
    }
}

/// Flattened result for callers that want `(success, payload, error)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchOutcome {
    /// True if a payload was delivered.
    pub success: bool,
    /// The payload on success.
    pub payload: Option<Bytes>,
    /// Failure reason on error, e.g. `"cancelled"`.
    pub error: Option<String>,
}

impl FetchOutcome {
    /// Splits the outcome into its parts.
    pub fn into_parts(self) -> (bool, Option<Bytes>, Option<String>) {
        (self.success, self.payload, self.error)
    }
}

impl From<FetchResult> for FetchOutcome {
    fn from(result: FetchResult) -> Self {
        match result {
            Ok(payload) => Self {
                success: true,
                payload: Some(payload),
                error: None,
            },
            Err(e) => Self {
                success: false,
                payload: None,
                error: Some(e.to_string()),
            },
        }
    }
}

// =============================================================================
// Completion
// =============================================================================

/// Where a request's terminal result goes.
///
/// Consumed by [`Completion::deliver`], so a result can be delivered at most
/// once per request.
pub(crate) enum Completion {
    Callback(Box<dyn FnOnce(FetchResult) + Send + 'static>),
    Channel(oneshot::Sender<FetchResult>),
}

impl Completion {
    pub(crate) fn callback<F>(f: F) -> Self
    where
        F: FnOnce(FetchResult) + Send + 'static,
    {
        Self::Callback(Box::new(f))
    }

    /// Hands `result` to the caller. A panicking callback is logged and
    /// contained so that deliveries after it in the same batch still run.
    pub(crate) fn deliver(self, result: FetchResult) {
        match self {
            Self::Callback(f) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || f(result))) {
                    warn!(panic = panic_message(&*payload), "Result callback panicked");
                }
            }
            Self::Channel(tx) => {
                // The receiver may have been dropped; nobody is waiting then.
                let _ = tx.send(result);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown"
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Completion::Callback"),
            Self::Channel(_) => f.write_str("Completion::Channel"),
        }
    }
}

// =============================================================================
// Response Handle
// =============================================================================

/// Future resolving to the terminal result of a request made with
/// [`Dispatcher::fetch`](super::Dispatcher::fetch).
///
/// Dropping the handle does not cancel the request; use
/// [`Dispatcher::cancel`](super::Dispatcher::cancel).
#[derive(Debug)]
pub struct ResponseHandle {
    url: String,
    rx: oneshot::Receiver<FetchResult>,
}

impl ResponseHandle {
    pub(crate) fn channel(url: String) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        (Self { url, rx }, Completion::Channel(tx))
    }

    pub(crate) fn ready(url: String, result: FetchResult) -> Self {
        let (handle, completion) = Self::channel(url);
        completion.deliver(result);
        handle
    }

    /// URL the request was submitted with, after rewriting.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Future for ResponseHandle {
    type Output = FetchResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(FetchError::cancelled(&this.url))))
    }
}

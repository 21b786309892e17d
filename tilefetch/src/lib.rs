//! tilefetch - HTTP resource fetching for map engines
//!
//! This library fetches map tiles, style sheets, glyphs and sprites over
//! HTTP(S) for a rendering engine. Requests run on a bounded pool of
//! concurrent transfers, can be cancelled by URL at any time, and are
//! backed by an optional size-bounded disk cache that honours HTTP
//! freshness and revalidation.
//!
//! Every submitted request receives exactly one terminal result:
//! succeeded with a payload, failed with a cause, or cancelled.
//!
//! ```ignore
//! use tilefetch::{Dispatcher, TransportConfig};
//!
//! let dispatcher = Dispatcher::new(TransportConfig::default())?;
//! let payload = dispatcher.fetch("https://tiles.example/0/0/0.pbf").await?;
//! ```

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod telemetry;
pub mod transport;

pub use config::{ConfigFile, TransportConfig};
pub use dispatcher::{
    Dispatcher, DispatcherBuilder, FetchOutcome, FetchResult, QueryParamRewriter, RequestId,
    ResponseHandle, TerminalState, UrlRewriter,
};
pub use error::{ConfigError, FetchError};
pub use transport::TlsVersion;

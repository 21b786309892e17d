//! URL rewriting applied before submission and cancellation.
//!
//! Map engines often need to decorate tile URLs, for example with an API
//! key. The rewrite is applied on both `submit` and `cancel`, so a caller
//! cancelling with the undecorated URL still matches the request.

use reqwest::Url;

/// Rewrites request URLs.
pub trait UrlRewriter: Send + Sync + 'static {
    /// Returns the URL to fetch for `url`.
    fn rewrite(&self, url: &str) -> String;
}

impl<F> UrlRewriter for F
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    fn rewrite(&self, url: &str) -> String {
        self(url)
    }
}

/// Appends a query parameter (typically an API key) to every URL.
///
/// URLs that do not parse, or that already carry the parameter, are left
/// unchanged.
#[derive(Clone, Debug)]
pub struct QueryParamRewriter {
    name: String,
    value: String,
}

impl QueryParamRewriter {
    /// Creates a rewriter appending `name=value`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl UrlRewriter for QueryParamRewriter {
    fn rewrite(&self, url: &str) -> String {
        let Ok(mut parsed) = Url::parse(url) else {
            return url.to_string();
        };
        if parsed.query_pairs().any(|(name, _)| name == self.name.as_str()) {
            return url.to_string();
        }
        parsed
            .query_pairs_mut()
            .append_pair(&self.name, &self.value);
        parsed.into()
    }
}

//! HTTP caching headers: `Cache-Control` directives, HTTP dates and
//! freshness lifetime.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Upper bound on heuristic freshness derived from `Last-Modified`.
pub const MAX_HEURISTIC_FRESHNESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Fraction of the document age used as heuristic freshness.
const HEURISTIC_FRACTION: f64 = 0.1;

/// Parsed `Cache-Control` response directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// `max-age` in seconds.
    pub max_age: Option<u64>,
    /// `no-cache`: stored entries must be revalidated before use.
    pub no_cache: bool,
    /// `no-store`: the response must not be stored.
    pub no_store: bool,
    /// `must-revalidate`: stale entries must not be served unvalidated.
    pub must_revalidate: bool,
}

impl CacheControl {
    /// Parses a `Cache-Control` header value. Unknown directives are ignored.
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();

        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, arg) = match directive.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                None => (directive, None),
            };

            match name.to_ascii_lowercase().as_str() {
                "max-age" => cc.max_age = arg.and_then(|a| a.parse().ok()),
                "no-cache" => cc.no_cache = true,
                "no-store" => cc.no_store = true,
                "must-revalidate" => cc.must_revalidate = true,
                _ => {}
            }
        }

        cc
    }

    /// Returns true unless the response forbids storage.
    pub fn is_storable(&self) -> bool {
        !self.no_store
    }
}

/// Parses an HTTP-date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Formats a timestamp as an HTTP-date.
pub fn format_http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Converts unix seconds back to a UTC timestamp.
pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// How long a response stays fresh after it was received.
///
/// Precedence: `no-cache` (zero), `max-age`, `Expires` relative to `Date`
/// (or the receive time when `Date` is absent), then a heuristic of 10% of
/// the time since `Last-Modified`, capped at 24 hours. Zero otherwise.
pub fn freshness_lifetime(
    cache_control: &CacheControl,
    date: Option<DateTime<Utc>>,
    expires: Option<DateTime<Utc>>,
    last_modified: Option<DateTime<Utc>>,
    received_at: DateTime<Utc>,
) -> Duration {
    if cache_control.no_cache {
        return Duration::ZERO;
    }

    if let Some(max_age) = cache_control.max_age {
        return Duration::from_secs(max_age);
    }

    let date = date.unwrap_or(received_at);

    if let Some(expires) = expires {
        return (expires - date).to_std().unwrap_or(Duration::ZERO);
    }

    if let Some(last_modified) = last_modified {
        let age = (date - last_modified).to_std().unwrap_or(Duration::ZERO);
        return age.mul_f64(HEURISTIC_FRACTION).min(MAX_HEURISTIC_FRESHNESS);
    }

    Duration::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        from_unix(secs).unwrap()
    }

    #[test]
    fn test_parse_basic() {
        let cc = CacheControl::parse("public, max-age=3600");
        assert_eq!(cc.max_age, Some(3600));
        assert!(!cc.no_cache);
        assert!(cc.is_storable());
    }

    #[test]
    fn test_parse_flags_case_insensitive() {
        let cc = CacheControl::parse("No-Store, NO-CACHE, Must-Revalidate");
        assert!(cc.no_store);
        assert!(cc.no_cache);
        assert!(cc.must_revalidate);
        assert!(!cc.is_storable());
    }

    #[test]
    fn test_parse_quoted_and_invalid_max_age() {
        assert_eq!(CacheControl::parse("max-age=\"60\"").max_age, Some(60));
        assert_eq!(CacheControl::parse("max-age=soon").max_age, None);
        assert_eq!(CacheControl::parse("").max_age, None);
    }

    #[test]
    fn test_http_date_roundtrip() {
        let date = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(date.timestamp(), 784_111_777);
        assert_eq!(format_http_date(date), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn test_max_age_wins() {
        let cc = CacheControl::parse("max-age=60");
        let lifetime = freshness_lifetime(&cc, Some(at(0)), Some(at(1000)), None, at(0));
        assert_eq!(lifetime, Duration::from_secs(60));
    }

    #[test]
    fn test_no_cache_is_never_fresh() {
        let cc = CacheControl::parse("no-cache, max-age=60");
        assert_eq!(
            freshness_lifetime(&cc, None, None, None, at(0)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_expires_relative_to_date() {
        let cc = CacheControl::default();
        let lifetime = freshness_lifetime(&cc, Some(at(100)), Some(at(400)), None, at(5000));
        assert_eq!(lifetime, Duration::from_secs(300));

        // Expires in the past
        let lifetime = freshness_lifetime(&cc, Some(at(400)), Some(at(100)), None, at(400));
        assert_eq!(lifetime, Duration::ZERO);
    }

    #[test]
    fn test_heuristic_freshness() {
        let cc = CacheControl::default();
        let lifetime = freshness_lifetime(&cc, Some(at(10_000)), None, Some(at(0)), at(10_000));
        assert_eq!(lifetime, Duration::from_secs(1000));
    }

    #[test]
    fn test_heuristic_freshness_capped() {
        let cc = CacheControl::default();
        let year = 365 * 24 * 60 * 60;
        let lifetime = freshness_lifetime(&cc, Some(at(year)), None, Some(at(0)), at(year));
        assert_eq!(lifetime, MAX_HEURISTIC_FRESHNESS);
    }

    #[test]
    fn test_no_information_means_stale() {
        let cc = CacheControl::default();
        assert_eq!(
            freshness_lifetime(&cc, Some(at(0)), None, None, at(0)),
            Duration::ZERO
        );
    }
}

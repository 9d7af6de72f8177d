//! Provider quota headers and endpoint keys.
//!
//! The provider advertises limits as comma-separated `requests:window_seconds`
//! pairs, e.g. `X-App-Rate-Limit: 20:1,100:120`, and reports current usage in
//! the same shape through the matching `-Count` header.

use std::collections::HashMap;
use std::time::Duration;

use matchwatch_common::AppError;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Segments longer than this are treated as opaque identifiers.
const MAX_LITERAL_SEGMENT_LEN: usize = 32;

/// One advertised quota tier: `requests` calls per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitTier {
    /// Requests allowed (or used, for count headers) in the window.
    pub requests: usize,
    /// Window length.
    pub window: Duration,
}

impl LimitTier {
    /// Create a tier.
    #[must_use]
    pub const fn new(requests: usize, window: Duration) -> Self {
        Self { requests, window }
    }
}

/// Error parsing a `requests:window` pair.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitParseError {
    #[error("malformed limit pair {0:?}, expected <requests>:<window-seconds>")]
    Malformed(String),
    #[error("limit pair {0:?} has a zero window")]
    ZeroWindow(String),
}

impl From<LimitParseError> for AppError {
    fn from(err: LimitParseError) -> Self {
        Self::Config(err.to_string())
    }
}

fn parse_pair(pair: &str) -> Result<LimitTier, LimitParseError> {
    let (requests, window) = pair
        .split_once(':')
        .ok_or_else(|| LimitParseError::Malformed(pair.to_string()))?;
    let requests: usize = requests
        .trim()
        .parse()
        .map_err(|_| LimitParseError::Malformed(pair.to_string()))?;
    let window: u64 = window
        .trim()
        .parse()
        .map_err(|_| LimitParseError::Malformed(pair.to_string()))?;
    if window == 0 {
        return Err(LimitParseError::ZeroWindow(pair.to_string()));
    }
    Ok(LimitTier::new(requests, Duration::from_secs(window)))
}

/// Parse a limit string strictly, rejecting any malformed pair.
///
/// Used for configured limits, where a typo should stop startup.
pub fn parse_limits_strict(raw: &str) -> Result<Vec<LimitTier>, LimitParseError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(parse_pair)
        .collect()
}

/// Parse a limit header leniently, skipping malformed pairs with a warning.
#[must_use]
pub fn parse_limits(raw: &str) -> Vec<LimitTier> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| match parse_pair(pair) {
            Ok(tier) => Some(tier),
            Err(e) => {
                warn!(header = raw, error = %e, "Ignoring malformed rate limit pair");
                None
            }
        })
        .collect()
}

/// Parse a `Retry-After` value given as a bare integer of seconds.
#[must_use]
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Case-insensitive header lookup over whatever map the caller has.
pub trait HeaderLookup {
    /// Return the value of `name`, if present and valid UTF-8.
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl HeaderLookup for [(&str, &str)] {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
    }
}

impl HeaderLookup for reqwest::header::HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Build the per-endpoint tracker key: `"<METHOD> <normalized path>"`.
#[must_use]
pub fn endpoint_key(method: &str, endpoint: &str) -> String {
    format!("{} {}", method.trim().to_ascii_uppercase(), normalize_path(endpoint))
}

/// Reduce an endpoint to its route shape.
///
/// Scheme, host and query are dropped, and identifier-like segments become
/// `{id}`, so `/lol/match/v5/matches/NA1_4242?start=0` and
/// `/lol/match/v5/matches/EUW1_17` share one quota bucket.
#[must_use]
pub fn normalize_path(endpoint: &str) -> String {
    let path = match Url::parse(endpoint) {
        Ok(url) if url.has_host() => url.path().to_string(),
        _ => endpoint
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if is_identifier(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect();

    format!("/{}", segments.join("/"))
}

fn is_identifier(segment: &str) -> bool {
    if segment.len() > MAX_LITERAL_SEGMENT_LEN {
        return true;
    }
    segment.bytes().any(|b| b.is_ascii_digit()) && !is_version_marker(segment)
}

fn is_version_marker(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limits() {
        let tiers = parse_limits("20:1,100:120");
        assert_eq!(
            tiers,
            vec![
                LimitTier::new(20, Duration::from_secs(1)),
                LimitTier::new(100, Duration::from_secs(120)),
            ]
        );
    }

    #[test]
    fn test_parse_limits_skips_malformed_pairs() {
        let tiers = parse_limits("20:1, abc ,5:0,7:x, 300:10");
        assert_eq!(
            tiers,
            vec![
                LimitTier::new(20, Duration::from_secs(1)),
                LimitTier::new(300, Duration::from_secs(10)),
            ]
        );
        assert!(parse_limits("").is_empty());
    }

    #[test]
    fn test_parse_limits_strict() {
        assert_eq!(parse_limits_strict("5:1").unwrap().len(), 1);
        assert_eq!(
            parse_limits_strict("5:1,oops"),
            Err(LimitParseError::Malformed("oops".to_string()))
        );
        assert_eq!(
            parse_limits_strict("5:0"),
            Err(LimitParseError::ZeroWindow("5:0".to_string()))
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("x-app-rate-limit".to_string(), "20:1".to_string());
        assert_eq!(headers.header("X-App-Rate-Limit"), Some("20:1"));
        assert_eq!(headers.header("Retry-After"), None);

        let pairs: &[(&str, &str)] = &[("Retry-After", "3")];
        assert_eq!(pairs.header("retry-after"), Some("3"));
    }

    #[test]
    fn test_reqwest_header_lookup() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-method-rate-limit", "250:10".parse().unwrap());
        assert_eq!(headers.header("X-Method-Rate-Limit"), Some("250:10"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("https://na1.api.example.gg/lol/match/v5/matches/NA1_4242?start=0"),
            "/lol/match/v5/matches/{id}"
        );
        assert_eq!(
            normalize_path("/lol/match/v5/matches/by-puuid/abcdefghijklmnopqrstuvwxyzABCDEFGHIJ/ids"),
            "/lol/match/v5/matches/by-puuid/{id}/ids"
        );
        assert_eq!(normalize_path("/status/"), "/status");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_endpoint_key() {
        assert_eq!(
            endpoint_key("get", "/summoner/v4/summoners/12345"),
            "GET /summoner/v4/summoners/{id}"
        );
        assert_eq!(
            endpoint_key("GET", "/summoner/v4/summoners/98765"),
            endpoint_key("get", "/summoner/v4/summoners/12345?x=1")
        );
        assert_ne!(
            endpoint_key("POST", "/summoner/v4/summoners/1"),
            endpoint_key("GET", "/summoner/v4/summoners/1")
        );
    }
}

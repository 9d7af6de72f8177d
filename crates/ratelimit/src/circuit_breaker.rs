//! Circuit breaker for one category of outbound failures.
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      failure_count reaches failure_threshold
//! Open      → Half-Open: recovery_timeout elapsed since last failure (checked in before_request)
//! Half-Open → Closed:    next request succeeds
//! Half-Open → Open:      next request fails
//! ```
//!
//! Methods take `&mut self`; the owner serializes access (the rate limiter
//! keeps every breaker behind its single mutex).

use std::fmt;
use std::time::Duration;

use matchwatch_common::{AppError, AppResult};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Category of outbound failure, one breaker per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// HTTP 429 from the provider.
    RateLimit,
    /// HTTP 5xx or a refused connection.
    ServerError,
    /// The request timed out.
    Timeout,
}

impl FailureKind {
    /// Every kind, in breaker evaluation order.
    pub const ALL: [Self; 3] = [Self::RateLimit, Self::ServerError, Self::Timeout];

    /// Stable name used in logs and stats.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::Timeout => "timeout",
        }
    }

    /// Classify an HTTP status; `None` means it does not count against any breaker.
    #[must_use]
    pub const fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimit),
            500..=599 => Some(Self::ServerError),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "429" | "rate_limit" | "rate-limit" => Ok(Self::RateLimit),
            "5xx" | "server_error" | "server-error" => Ok(Self::ServerError),
            "timeout" => Ok(Self::Timeout),
            other => Err(AppError::Config(format!("unknown failure kind: {other}"))),
        }
    }
}

/// Three-state failure guard.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    /// Times the breaker went from closed or half-open to open.
    trips: u64,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub trips: u64,
    /// Milliseconds until a probe is allowed, when open.
    pub retry_in_ms: Option<u64>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> AppResult<Self> {
        let name = name.into();
        if failure_threshold == 0 {
            return Err(AppError::Config(format!(
                "circuit breaker {name}: failure threshold must be positive"
            )));
        }
        Ok(Self {
            name,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            failure_threshold,
            recovery_timeout,
            trips: 0,
        })
    }

    /// Breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, without applying the time-based transition.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures counted so far.
    #[must_use]
    pub const fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Decide whether a request may proceed.
    ///
    /// Moves OPEN to HALF_OPEN once the recovery timeout has elapsed.
    pub fn before_request(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.time_until_half_open(now).is_some() {
                    return false;
                }
                info!(
                    breaker = %self.name,
                    recovery_timeout_secs = self.recovery_timeout.as_secs_f64(),
                    "Circuit breaker half-open, allowing probe request"
                );
                self.state = CircuitState::HalfOpen;
                true
            }
        }
    }

    /// Record a successful request.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                if self.failure_count > 0 {
                    debug!(
                        breaker = %self.name,
                        previous_failures = self.failure_count,
                        "Circuit breaker failures reset after success"
                    );
                }
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "Circuit breaker recovered, closing");
                self.state = CircuitState::Closed;
                self.failure_count = 0;
            }
            // A late response from before the trip; the open period stands.
            CircuitState::Open => {}
        }
    }

    /// Record a failed request.
    pub fn record_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(now);

        match self.state {
            CircuitState::Closed => {
                if self.failure_count >= self.failure_threshold {
                    self.trip();
                } else {
                    debug!(
                        breaker = %self.name,
                        failures = self.failure_count,
                        threshold = self.failure_threshold,
                        "Circuit breaker failure recorded"
                    );
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Probe request failed, circuit breaker reopening");
                self.trip();
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.trips += 1;
        warn!(
            breaker = %self.name,
            failures = self.failure_count,
            threshold = self.failure_threshold,
            recovery_timeout_secs = self.recovery_timeout.as_secs_f64(),
            "Circuit breaker opened"
        );
    }

    /// Time left before an open breaker admits a probe; `None` unless open and waiting.
    #[must_use]
    pub fn time_until_half_open(&self, now: Instant) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        let last_failure = self.last_failure_time?;
        let remaining = (last_failure + self.recovery_timeout).saturating_duration_since(now);
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Return to CLOSED with no recorded failures.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure_time = None;
    }

    /// Snapshot for stats reporting.
    #[must_use]
    pub fn stats(&self, now: Instant) -> BreakerStats {
        BreakerStats {
            name: self.name.clone(),
            state: self.state,
            failure_count: self.failure_count,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout.as_secs_f64(),
            trips: self.trips,
            retry_in_ms: self
                .time_until_half_open(now)
                .map(|d| d.as_millis() as u64),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new("test", threshold, Duration::from_secs(recovery_secs)).unwrap()
    }

    #[test]
    fn test_rejects_zero_threshold() {
        assert!(CircuitBreaker::new("bad", 0, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_opens_after_threshold() {
        let mut cb = breaker(3, 10);
        let t0 = Instant::now();

        cb.record_failure(t0);
        cb.record_failure(t0);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.before_request(t0));

        cb.record_failure(t0);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.before_request(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut cb = breaker(3, 10);
        let t0 = Instant::now();

        cb.record_failure(t0);
        cb.record_failure(t0);
        cb.record_success();
        cb.record_failure(t0);
        cb.record_failure(t0);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 2);
    }

    #[test]
    fn test_half_open_then_close() {
        let mut cb = breaker(2, 10);
        let t0 = Instant::now();
        cb.record_failure(t0);
        cb.record_failure(t0);

        let later = t0 + Duration::from_secs(10);
        assert!(cb.before_request(later));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = breaker(2, 10);
        let t0 = Instant::now();
        cb.record_failure(t0);
        cb.record_failure(t0);

        let later = t0 + Duration::from_secs(11);
        assert!(cb.before_request(later));
        cb.record_failure(later);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.before_request(later + Duration::from_secs(9)));
        assert!(cb.before_request(later + Duration::from_secs(10)));
    }

    #[test]
    fn test_failure_while_open_extends_open_period() {
        let mut cb = breaker(1, 10);
        let t0 = Instant::now();
        cb.record_failure(t0);
        cb.record_failure(t0 + Duration::from_secs(8));

        assert!(!cb.before_request(t0 + Duration::from_secs(12)));
        assert_eq!(
            cb.time_until_half_open(t0 + Duration::from_secs(12)),
            Some(Duration::from_secs(6))
        );
    }

    #[test]
    fn test_stats_and_reset() {
        let mut cb = breaker(1, 30);
        let t0 = Instant::now();
        cb.record_failure(t0);

        let stats = cb.stats(t0 + Duration::from_secs(10));
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.trips, 1);
        assert_eq!(stats.retry_in_ms, Some(20_000));

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.before_request(t0));
    }

    #[test]
    fn test_failure_kind_parsing() {
        assert_eq!("429".parse::<FailureKind>().unwrap(), FailureKind::RateLimit);
        assert_eq!("5xx".parse::<FailureKind>().unwrap(), FailureKind::ServerError);
        assert_eq!("timeout".parse::<FailureKind>().unwrap(), FailureKind::Timeout);
        assert!("teapot".parse::<FailureKind>().is_err());
    }

    #[test]
    fn test_failure_kind_from_status() {
        assert_eq!(FailureKind::from_status(429), Some(FailureKind::RateLimit));
        assert_eq!(FailureKind::from_status(503), Some(FailureKind::ServerError));
        assert_eq!(FailureKind::from_status(404), None);
        assert_eq!(FailureKind::from_status(200), None);
    }
}

//! The outbound API gate.
//!
//! Every call to the provider passes through [`RateLimiter::wait_if_needed`]
//! first. The limiter combines app-wide quota tiers, per-endpoint tiers,
//! per-endpoint spacing and one circuit breaker per [`FailureKind`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use matchwatch_common::config::{BreakerSettings, RateLimitHeaderSettings, RateLimitSettings};
use matchwatch_common::{AppError, AppResult, Metrics, RetryConfig};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::circuit_breaker::{BreakerStats, CircuitBreaker, CircuitState, FailureKind};
use crate::headers::{
    HeaderLookup, LimitTier, endpoint_key, normalize_path, parse_limits, parse_limits_strict,
    parse_retry_after,
};
use crate::tracker::{RateLimitTracker, TrackerStats};

/// Floor on any non-zero wait, so a tracker sitting exactly on its window
/// boundary does not spin.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Circuit breaker parameters.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl From<BreakerSettings> for BreakerConfig {
    fn from(settings: BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_secs(settings.recovery_timeout_secs),
        }
    }
}

/// Runtime configuration for [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tiers applied to every call until the provider advertises its own.
    pub app_limits: Vec<LimitTier>,
    /// Tiers applied to each endpoint until the provider advertises its own.
    pub method_limits: Vec<LimitTier>,
    /// Minimum gap between two requests to the same endpoint key.
    pub min_spacing: Duration,
    /// Delay after a 429 when neither `Retry-After` nor any tracker suggests one.
    pub default_retry_after: Duration,
    /// Provider header names.
    pub headers: RateLimitHeaderSettings,
    /// Generic retry backoff handed out by [`RateLimiter::calculate_backoff`].
    pub backoff: RetryConfig,
    pub rate_limit_breaker: BreakerConfig,
    pub server_error_breaker: BreakerConfig,
    pub timeout_breaker: BreakerConfig,
}

impl RateLimiterConfig {
    /// Breaker parameters for one failure kind.
    #[must_use]
    pub const fn breaker(&self, kind: FailureKind) -> BreakerConfig {
        match kind {
            FailureKind::RateLimit => self.rate_limit_breaker,
            FailureKind::ServerError => self.server_error_breaker,
            FailureKind::Timeout => self.timeout_breaker,
        }
    }

    fn validate(&self) -> AppResult<()> {
        if let Some(tier) = self
            .app_limits
            .iter()
            .chain(&self.method_limits)
            .find(|tier| tier.requests == 0 || tier.window.is_zero())
        {
            return Err(AppError::Config(format!(
                "rate limit tier {}:{} must have a positive count and window",
                tier.requests,
                tier.window.as_secs()
            )));
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let settings = RateLimitSettings::default();
        Self {
            app_limits: vec![
                LimitTier::new(20, Duration::from_secs(1)),
                LimitTier::new(100, Duration::from_secs(120)),
            ],
            method_limits: Vec::new(),
            min_spacing: Duration::from_millis(settings.min_spacing_ms),
            default_retry_after: Duration::from_secs(settings.default_retry_after_secs),
            backoff: backoff_from(&settings),
            rate_limit_breaker: settings.rate_limit_breaker.into(),
            server_error_breaker: settings.server_error_breaker.into(),
            timeout_breaker: settings.timeout_breaker.into(),
            headers: settings.headers,
        }
    }
}

impl TryFrom<&RateLimitSettings> for RateLimiterConfig {
    type Error = AppError;

    fn try_from(settings: &RateLimitSettings) -> Result<Self, Self::Error> {
        let method_limits = match settings.method_limits.as_deref() {
            Some(raw) => parse_limits_strict(raw)?,
            None => Vec::new(),
        };
        Ok(Self {
            app_limits: parse_limits_strict(&settings.app_limits)?,
            method_limits,
            min_spacing: Duration::from_millis(settings.min_spacing_ms),
            default_retry_after: Duration::from_secs(settings.default_retry_after_secs),
            headers: settings.headers.clone(),
            backoff: backoff_from(settings),
            rate_limit_breaker: settings.rate_limit_breaker.into(),
            server_error_breaker: settings.server_error_breaker.into(),
            timeout_breaker: settings.timeout_breaker.into(),
        })
    }
}

fn backoff_from(settings: &RateLimitSettings) -> RetryConfig {
    RetryConfig {
        initial_delay: Duration::from_millis(settings.backoff_base_ms),
        max_delay: Duration::from_secs(settings.backoff_max_secs),
        jitter: Duration::from_millis(settings.backoff_jitter_ms),
        ..RetryConfig::default()
    }
}

type TierTrackers = BTreeMap<Duration, RateLimitTracker>;

fn build_trackers(tiers: &[LimitTier]) -> TierTrackers {
    tiers
        .iter()
        .filter_map(|tier| {
            RateLimitTracker::new(tier.requests, tier.window)
                .ok()
                .map(|tracker| (tier.window, tracker))
        })
        .collect()
}

/// Longest wait any tracker in `trackers` imposes at `now`.
fn trackers_wait(trackers: &mut TierTrackers, now: Instant) -> Duration {
    trackers
        .values_mut()
        .filter_map(|tracker| {
            (!tracker.can_make_request(now)).then(|| tracker.get_wait_time(now).max(MIN_WAIT))
        })
        .max()
        .unwrap_or(Duration::ZERO)
}

/// Bring `trackers` in line with an advertised tier list.
///
/// Known windows keep their history, new windows get a fresh tracker and
/// windows that are no longer advertised are dropped.
fn apply_tiers(trackers: &mut TierTrackers, tiers: &[LimitTier], scope: &str) {
    let tiers: Vec<LimitTier> = tiers
        .iter()
        .copied()
        .filter(|tier| tier.requests > 0)
        .collect();
    if tiers.is_empty() {
        return;
    }

    for tier in &tiers {
        match trackers.get_mut(&tier.window) {
            Some(tracker) if tracker.capacity() != tier.requests => {
                debug!(
                    scope,
                    window_secs = tier.window.as_secs(),
                    old = tracker.capacity(),
                    new = tier.requests,
                    "Rate limit tier capacity changed"
                );
                // Zero capacities were filtered above.
                let _ = tracker.set_capacity(tier.requests);
            }
            Some(_) => {}
            None => {
                if let Ok(tracker) = RateLimitTracker::new(tier.requests, tier.window) {
                    info!(
                        scope,
                        requests = tier.requests,
                        window_secs = tier.window.as_secs(),
                        "Tracking new rate limit tier"
                    );
                    trackers.insert(tier.window, tracker);
                }
            }
        }
    }

    trackers.retain(|window, _| tiers.iter().any(|tier| tier.window == *window));
}

fn sync_counts(trackers: &mut TierTrackers, counts: &[LimitTier], now: Instant) {
    for count in counts {
        if let Some(tracker) = trackers.get_mut(&count.window) {
            tracker.sync_usage(count.requests, now);
        }
    }
}

#[derive(Debug)]
struct EndpointState {
    trackers: TierTrackers,
    last_request: Option<Instant>,
    /// Last time anything read or updated this entry.
    touched: Instant,
    successes: u64,
    failures: u64,
    rate_limited: u64,
}

impl EndpointState {
    fn new(tiers: &[LimitTier], now: Instant) -> Self {
        Self {
            trackers: build_trackers(tiers),
            last_request: None,
            touched: now,
            successes: 0,
            failures: 0,
            rate_limited: 0,
        }
    }

    /// Untouched for longer than `horizon` (or its own longest window) and
    /// holding no usage in any tracker.
    fn is_idle(&mut self, horizon: Duration, now: Instant) -> bool {
        let horizon = self
            .trackers
            .keys()
            .next_back()
            .map_or(horizon, |window| horizon.max(*window));
        now.saturating_duration_since(self.touched) > horizon
            && self
                .trackers
                .values_mut()
                .all(|tracker| tracker.current_usage(now) == 0)
    }
}

#[derive(Debug)]
struct LimiterState {
    app_trackers: TierTrackers,
    endpoints: HashMap<String, EndpointState>,
    breakers: BTreeMap<FailureKind, CircuitBreaker>,
}

impl LimiterState {
    fn new(config: &RateLimiterConfig) -> AppResult<Self> {
        let breakers = FailureKind::ALL
            .into_iter()
            .map(|kind| {
                let breaker = config.breaker(kind);
                CircuitBreaker::new(kind.as_str(), breaker.failure_threshold, breaker.recovery_timeout)
                    .map(|cb| (kind, cb))
            })
            .collect::<AppResult<_>>()?;

        Ok(Self {
            app_trackers: build_trackers(&config.app_limits),
            endpoints: HashMap::new(),
            breakers,
        })
    }

    fn endpoint_mut(
        &mut self,
        key: &str,
        config: &RateLimiterConfig,
        now: Instant,
    ) -> &mut EndpointState {
        let endpoint = self
            .endpoints
            .entry(key.to_string())
            .or_insert_with(|| EndpointState::new(&config.method_limits, now));
        endpoint.touched = now;
        endpoint
    }

    /// Forget endpoints that have gone idle.
    fn prune_endpoints(&mut self, min_spacing: Duration, now: Instant) {
        let horizon = self
            .app_trackers
            .keys()
            .next_back()
            .map_or(min_spacing, |window| min_spacing.max(*window));
        let before = self.endpoints.len();
        self.endpoints
            .retain(|_, endpoint| !endpoint.is_idle(horizon, now));

        let removed = before - self.endpoints.len();
        if removed > 0 {
            debug!(removed, remaining = self.endpoints.len(), "Pruned idle endpoints");
        }
    }

    /// First breaker refusing requests, with its retry hint.
    fn open_breaker(&mut self, now: Instant) -> Option<(FailureKind, Option<Duration>)> {
        self.breakers.iter_mut().find_map(|(kind, breaker)| {
            (!breaker.before_request(now)).then(|| (*kind, breaker.time_until_half_open(now)))
        })
    }
}

/// Serializable snapshot of one endpoint's state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub limits: Vec<TrackerStats>,
    pub successes: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub ms_since_last_request: Option<u64>,
}

/// Serializable snapshot of the whole limiter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub app_limits: Vec<TrackerStats>,
    pub endpoints: BTreeMap<String, EndpointStats>,
    pub circuit_breakers: BTreeMap<String, BreakerStats>,
}

/// Rate limiter for calls to the external match-data API.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
    metrics: Arc<Metrics>,
}

impl RateLimiter {
    /// Create a limiter, validating the configured tiers and breakers.
    pub fn new(config: RateLimiterConfig, metrics: Arc<Metrics>) -> AppResult<Self> {
        config.validate()?;
        let state = LimiterState::new(&config)?;
        Ok(Self {
            config,
            state: Mutex::new(state),
            metrics,
        })
    }

    /// Create a limiter from the `[rate_limit]` configuration section.
    pub fn from_settings(settings: &RateLimitSettings, metrics: Arc<Metrics>) -> AppResult<Self> {
        Self::new(RateLimiterConfig::try_from(settings)?, metrics)
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait until a call to `endpoint` is allowed, then record it.
    ///
    /// Fails fast with [`AppError::RateLimitExceeded`] while any circuit
    /// breaker is open; never sleeps in that case.
    pub async fn wait_if_needed(&self, endpoint: &str, method: &str) -> AppResult<()> {
        let key = endpoint_key(method, endpoint);
        let mut waited = Duration::ZERO;

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                if let Some((kind, retry_after)) = state.open_breaker(now) {
                    drop(state);
                    self.metrics.record_request_rejected();
                    warn!(
                        endpoint = %key,
                        breaker = %kind,
                        retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                        "Request rejected, circuit breaker open"
                    );
                    return Err(AppError::rate_limited(
                        format!("{kind} circuit breaker is open"),
                        retry_after,
                    ));
                }

                let min_spacing = self.config.min_spacing;
                let app_wait = trackers_wait(&mut state.app_trackers, now);
                let endpoint = state.endpoint_mut(&key, &self.config, now);
                let endpoint_wait = trackers_wait(&mut endpoint.trackers, now);
                let spacing_wait = endpoint
                    .last_request
                    .map_or(Duration::ZERO, |last| {
                        min_spacing.saturating_sub(now.saturating_duration_since(last))
                    });

                let wait = app_wait.max(endpoint_wait).max(spacing_wait);
                if wait.is_zero() {
                    endpoint.last_request = Some(now);
                    for tracker in endpoint.trackers.values_mut() {
                        tracker.record_request(now);
                    }
                    for tracker in state.app_trackers.values_mut() {
                        tracker.record_request(now);
                    }
                    drop(state);

                    self.metrics.record_request_allowed();
                    if !waited.is_zero() {
                        self.metrics.record_wait(waited);
                    }
                    return Ok(());
                }
                wait
            };

            debug!(
                endpoint = %key,
                wait_ms = wait.as_millis() as u64,
                "Waiting for rate limit capacity"
            );
            sleep(wait).await;
            waited += wait;
        }
    }

    /// Refresh trackers from the provider's quota headers.
    ///
    /// Also drops endpoint entries that have gone idle.
    pub async fn update_limits<H: HeaderLookup + ?Sized>(
        &self,
        headers: &H,
        endpoint: &str,
        method: &str,
    ) {
        let names = &self.config.headers;
        let key = endpoint_key(method, endpoint);
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.prune_endpoints(self.config.min_spacing, now);

        if let Some(raw) = headers.header(&names.app_limit) {
            apply_tiers(&mut state.app_trackers, &parse_limits(raw), "application");
        }
        if let Some(raw) = headers.header(&names.app_count) {
            sync_counts(&mut state.app_trackers, &parse_limits(raw), now);
        }

        let endpoint = state.endpoint_mut(&key, &self.config, now);
        if let Some(raw) = headers.header(&names.method_limit) {
            apply_tiers(&mut endpoint.trackers, &parse_limits(raw), &key);
        }
        if let Some(raw) = headers.header(&names.method_count) {
            sync_counts(&mut endpoint.trackers, &parse_limits(raw), now);
        }
    }

    /// Handle a 429 response and return how long the caller should back off.
    ///
    /// Counts as a failure against the rate-limit breaker.
    pub async fn handle_429<H: HeaderLookup + ?Sized>(&self, headers: &H, endpoint: &str) -> Duration {
        let explicit = headers
            .header(&self.config.headers.retry_after)
            .and_then(parse_retry_after);
        let path = normalize_path(endpoint);

        let mut state = self.state.lock().await;
        let now = Instant::now();

        let mut computed = trackers_wait(&mut state.app_trackers, now);
        for (key, ep) in &mut state.endpoints {
            if key.split_once(' ').is_some_and(|(_, p)| p == path) {
                ep.rate_limited += 1;
                computed = computed.max(trackers_wait(&mut ep.trackers, now));
            }
        }

        let delay = explicit.unwrap_or(if computed.is_zero() {
            self.config.default_retry_after
        } else {
            computed
        });

        if let Some(breaker) = state.breakers.get_mut(&FailureKind::RateLimit) {
            breaker.record_failure(now);
        }
        drop(state);

        self.metrics.record_429();
        warn!(
            endpoint = %path,
            retry_after_ms = delay.as_millis() as u64,
            explicit = explicit.is_some(),
            "Received 429 from provider"
        );
        delay
    }

    /// Record a successful call; every breaker moves toward closed.
    pub async fn record_success(&self, endpoint: &str, method: &str) {
        let key = endpoint_key(method, endpoint);
        let mut state = self.state.lock().await;
        let now = Instant::now();
        for breaker in state.breakers.values_mut() {
            breaker.record_success();
        }
        state.endpoint_mut(&key, &self.config, now).successes += 1;
    }

    /// Record a failed call against the breaker for `kind`.
    pub async fn record_failure(&self, endpoint: &str, method: &str, kind: FailureKind) {
        let key = endpoint_key(method, endpoint);
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(breaker) = state.breakers.get_mut(&kind) {
            breaker.record_failure(now);
        }
        state.endpoint_mut(&key, &self.config, now).failures += 1;
        debug!(endpoint = %key, kind = %kind, "Recorded outbound failure");
    }

    /// Exponential backoff with jitter for caller-driven retries.
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        self.config.backoff.jittered_delay(attempt)
    }

    /// Current state of one breaker.
    pub async fn breaker_state(&self, kind: FailureKind) -> Option<CircuitState> {
        self.state
            .lock()
            .await
            .breakers
            .get(&kind)
            .map(CircuitBreaker::state)
    }

    /// Snapshot of tracker usage and breaker states. Idle endpoints are
    /// dropped first.
    pub async fn get_stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.prune_endpoints(self.config.min_spacing, now);

        let app_limits = state
            .app_trackers
            .values_mut()
            .map(|tracker| tracker.stats(now))
            .collect();

        let endpoints = state
            .endpoints
            .iter_mut()
            .map(|(key, endpoint)| {
                let stats = EndpointStats {
                    limits: endpoint
                        .trackers
                        .values_mut()
                        .map(|tracker| tracker.stats(now))
                        .collect(),
                    successes: endpoint.successes,
                    failures: endpoint.failures,
                    rate_limited: endpoint.rate_limited,
                    ms_since_last_request: endpoint
                        .last_request
                        .map(|last| now.saturating_duration_since(last).as_millis() as u64),
                };
                (key.clone(), stats)
            })
            .collect();

        let circuit_breakers = state
            .breakers
            .iter()
            .map(|(kind, breaker)| (kind.as_str().to_string(), breaker.stats(now)))
            .collect();

        RateLimiterStats {
            app_limits,
            endpoints,
            circuit_breakers,
        }
    }

    /// Forget all usage and close every breaker.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.app_trackers = build_trackers(&self.config.app_limits);
        state.endpoints.clear();
        for breaker in state.breakers.values_mut() {
            breaker.reset();
        }
        info!("Rate limiter reset");
    }
}

//! Outbound rate limiting for matchwatch.
//!
//! This crate keeps calls to the external match-data provider inside its
//! advertised quotas:
//!
//! - **Tracker**: sliding-window counter per quota tier ([`RateLimitTracker`])
//! - **Circuit breaker**: closed/open/half-open guard per failure kind ([`CircuitBreaker`])
//! - **Limiter**: the single gate combining both ([`RateLimiter`])
//! - **Client**: `reqwest` wrapper that drives the limiter around each call ([`ApiClient`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use matchwatch_common::{AppResult, Metrics};
//! use matchwatch_ratelimit::{RateLimiter, RateLimiterConfig};
//!
//! async fn example() -> AppResult<()> {
//!     let limiter = RateLimiter::new(RateLimiterConfig::default(), Arc::new(Metrics::new()))?;
//!     limiter.wait_if_needed("/lol/match/v5/matches/EUW1_1", "GET").await?;
//!     // ... perform the call, then report the outcome ...
//!     limiter.record_success("/lol/match/v5/matches/EUW1_1", "GET").await;
//!     Ok(())
//! }
//! ```

pub mod circuit_breaker;
pub mod client;
pub mod headers;
pub mod limiter;
pub mod tracker;

pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitState, FailureKind};
pub use client::ApiClient;
pub use headers::{HeaderLookup, LimitTier, endpoint_key, normalize_path, parse_limits};
pub use limiter::{BreakerConfig, EndpointStats, RateLimiter, RateLimiterConfig, RateLimiterStats};
pub use tracker::{RateLimitTracker, TrackerStats};

//! Common utilities and shared types for matchwatch.
//!
//! This crate provides foundational components used across all matchwatch crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Metrics**: Task and rate-limit counters via [`Metrics`]
//! - **Retry**: Exponential backoff with jitter via [`RetryConfig`]
//!
//! # Example
//!
//! ```no_run
//! use matchwatch_common::{AppResult, Config, RetryConfig};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let retry = RetryConfig::default();
//!     println!(
//!         "{} workers, first retry after {:?}",
//!         config.queue.max_concurrent_tasks,
//!         retry.delay_for_attempt(1)
//!     );
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod retry;

pub use config::Config;
pub use error::{AppError, AppResult, BoxError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use retry::RetryConfig;

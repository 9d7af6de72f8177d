//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// External match-data API configuration.
    #[serde(default)]
    pub api: ApiConfig,
    /// Outbound rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Task queue configuration.
    #[serde(default)]
    pub queue: QueueSettings,
    /// Recurring task scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Worker manager (supervision and health) configuration.
    #[serde(default)]
    pub worker: WorkerSettings,
}

/// External API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the match-data provider.
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// API key sent with every request.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Header carrying the API key.
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Rate limiter configuration.
///
/// Limits are written the way the provider advertises them:
/// comma-separated `requests:window_seconds` pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Application-wide limits applied to every call.
    #[serde(default = "default_app_limits")]
    pub app_limits: String,
    /// Limits applied per endpoint until the provider advertises its own.
    #[serde(default)]
    pub method_limits: Option<String>,
    /// Minimum spacing between two requests to the same endpoint.
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    /// Fallback delay after a 429 without `Retry-After`.
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,
    /// Header names used by the provider.
    #[serde(default)]
    pub headers: RateLimitHeaderSettings,
    /// Base delay for generic exponential backoff, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound for generic exponential backoff, in seconds.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Maximum random jitter added to each backoff, in milliseconds.
    #[serde(default = "default_jitter_ms")]
    pub backoff_jitter_ms: u64,
    /// Breaker tripped by 429 responses.
    #[serde(default = "default_rate_limit_breaker")]
    pub rate_limit_breaker: BreakerSettings,
    /// Breaker tripped by 5xx responses.
    #[serde(default = "default_server_error_breaker")]
    pub server_error_breaker: BreakerSettings,
    /// Breaker tripped by request timeouts.
    #[serde(default = "default_timeout_breaker")]
    pub timeout_breaker: BreakerSettings,
}

/// Provider header names.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitHeaderSettings {
    #[serde(default = "default_app_limit_header")]
    pub app_limit: String,
    #[serde(default = "default_app_count_header")]
    pub app_count: String,
    #[serde(default = "default_method_limit_header")]
    pub method_limit: String,
    #[serde(default = "default_method_count_header")]
    pub method_count: String,
    #[serde(default = "default_retry_after_header")]
    pub retry_after: String,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before allowing a probe.
    pub recovery_timeout_secs: u64,
}

/// Task queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Number of concurrent worker loops.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// How long an idle worker waits for work before re-checking shutdown.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Grace period for in-flight tasks on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Maximum number of pending tasks (unbounded when unset).
    #[serde(default)]
    pub max_pending: Option<usize>,
    /// Completed tasks kept for status lookups.
    #[serde(default = "default_max_completed_tasks")]
    pub max_completed_tasks: usize,
    /// Retries granted to tasks submitted without an explicit count.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Base of the exponential retry delay, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Upper bound of the retry delay, in seconds.
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,
    /// Maximum random jitter added to each retry delay, in milliseconds.
    #[serde(default = "default_jitter_ms")]
    pub retry_jitter_ms: u64,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// How often due tasks are checked.
    #[serde(default = "default_scheduler_poll_secs")]
    pub poll_interval_secs: u64,
    /// Pause after an unexpected loop-level failure.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Recurring tasks registered at startup.
    #[serde(default)]
    pub tasks: Vec<ScheduledTaskSettings>,
}

/// A recurring task declared in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledTaskSettings {
    /// Unique schedule name.
    pub name: String,
    /// Task type dispatched to the queue.
    pub task_type: String,
    /// Seconds between runs.
    pub interval_secs: u64,
    /// Payload template copied into each run.
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Priority name (`low`, `normal`, `high`, `critical`).
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Run once at startup instead of waiting one interval.
    #[serde(default)]
    pub run_immediately: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Worker manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Recent failure ratio above which the system is unhealthy.
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    /// Pending task count above which the system is unhealthy.
    #[serde(default = "default_backlog_threshold")]
    pub backlog_threshold: usize,
    /// How late a scheduled task may be before it counts as overdue.
    #[serde(default = "default_overdue_grace_secs")]
    pub overdue_grace_secs: u64,
    /// Age after which completed tasks are evicted.
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,
    /// How often the retention sweep runs.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Poll interval used by `wait_for_task_completion`.
    #[serde(default = "default_wait_poll_interval_ms")]
    pub wait_poll_interval_ms: u64,
}

fn default_api_base_url() -> String {
    "https://api.example.gg".to_string()
}

fn default_api_key_header() -> String {
    "X-Api-Key".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    10
}

fn default_app_limits() -> String {
    "20:1,100:120".to_string()
}

const fn default_min_spacing_ms() -> u64 {
    50
}

const fn default_retry_after_secs() -> u64 {
    1
}

const fn default_backoff_base_ms() -> u64 {
    1000
}

const fn default_backoff_max_secs() -> u64 {
    60
}

const fn default_jitter_ms() -> u64 {
    1000
}

const fn default_rate_limit_breaker() -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 3,
        recovery_timeout_secs: 60,
    }
}

const fn default_server_error_breaker() -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 5,
        recovery_timeout_secs: 30,
    }
}

const fn default_timeout_breaker() -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 5,
        recovery_timeout_secs: 30,
    }
}

fn default_app_limit_header() -> String {
    "X-App-Rate-Limit".to_string()
}

fn default_app_count_header() -> String {
    "X-App-Rate-Limit-Count".to_string()
}

fn default_method_limit_header() -> String {
    "X-Method-Rate-Limit".to_string()
}

fn default_method_count_header() -> String {
    "X-Method-Rate-Limit-Count".to_string()
}

fn default_retry_after_header() -> String {
    "Retry-After".to_string()
}

const fn default_max_concurrent_tasks() -> usize {
    4
}

const fn default_poll_timeout_ms() -> u64 {
    1000
}

const fn default_shutdown_grace_secs() -> u64 {
    30
}

const fn default_max_completed_tasks() -> usize {
    1000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_base_ms() -> u64 {
    1000
}

const fn default_retry_max_secs() -> u64 {
    300
}

const fn default_scheduler_poll_secs() -> u64 {
    10
}

const fn default_error_backoff_secs() -> u64 {
    60
}

fn default_priority() -> String {
    "normal".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_health_check_interval_secs() -> u64 {
    60
}

const fn default_failure_rate_threshold() -> f64 {
    0.1
}

const fn default_backlog_threshold() -> usize {
    100
}

const fn default_overdue_grace_secs() -> u64 {
    300
}

const fn default_completed_retention_secs() -> u64 {
    3600
}

const fn default_cleanup_interval_secs() -> u64 {
    600
}

const fn default_wait_poll_interval_ms() -> u64 {
    100
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            api_key: None,
            api_key_header: default_api_key_header(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            app_limits: default_app_limits(),
            method_limits: None,
            min_spacing_ms: default_min_spacing_ms(),
            default_retry_after_secs: default_retry_after_secs(),
            headers: RateLimitHeaderSettings::default(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_secs: default_backoff_max_secs(),
            backoff_jitter_ms: default_jitter_ms(),
            rate_limit_breaker: default_rate_limit_breaker(),
            server_error_breaker: default_server_error_breaker(),
            timeout_breaker: default_timeout_breaker(),
        }
    }
}

impl Default for RateLimitHeaderSettings {
    fn default() -> Self {
        Self {
            app_limit: default_app_limit_header(),
            app_count: default_app_count_header(),
            method_limit: default_method_limit_header(),
            method_count: default_method_count_header(),
            retry_after: default_retry_after_header(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            poll_timeout_ms: default_poll_timeout_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            max_pending: None,
            max_completed_tasks: default_max_completed_tasks(),
            default_max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_secs: default_retry_max_secs(),
            retry_jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_scheduler_poll_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            tasks: Vec::new(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval_secs(),
            failure_rate_threshold: default_failure_rate_threshold(),
            backlog_threshold: default_backlog_threshold(),
            overdue_grace_secs: default_overdue_grace_secs(),
            completed_retention_secs: default_completed_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            wait_poll_interval_ms: default_wait_poll_interval_ms(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `MATCHWATCH_ENV`)
    /// 3. Environment variables with `MATCHWATCH_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("MATCHWATCH_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("MATCHWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MATCHWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from an inline TOML document (no environment overrides).
    pub fn from_toml_str(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.rate_limit.app_limits, "20:1,100:120");
        assert_eq!(config.rate_limit.min_spacing_ms, 50);
        assert_eq!(config.queue.max_concurrent_tasks, 4);
        assert_eq!(config.queue.shutdown_grace_secs, 30);
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert_eq!(config.worker.backlog_threshold, 100);
        assert!(config.scheduler.tasks.is_empty());
    }

    #[test]
    fn test_scheduled_tasks_from_toml() {
        let config = Config::from_toml_str(
            r#"
            [queue]
            max_concurrent_tasks = 8
            max_pending = 500

            [[scheduler.tasks]]
            name = "refresh-tracked-players"
            task_type = "fetch_match_history"
            interval_secs = 900
            priority = "low"
            payload = { region = "euw1", count = 20 }

            [[scheduler.tasks]]
            name = "nightly-analysis"
            task_type = "analyze_players"
            interval_secs = 86400
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_concurrent_tasks, 8);
        assert_eq!(config.queue.max_pending, Some(500));
        assert_eq!(config.scheduler.tasks.len(), 2);

        let refresh = &config.scheduler.tasks[0];
        assert_eq!(refresh.priority, "low");
        assert!(refresh.enabled);
        assert_eq!(refresh.payload["region"], "euw1");
        assert_eq!(refresh.max_retries, 3);

        let nightly = &config.scheduler.tasks[1];
        assert!(!nightly.enabled);
        assert_eq!(nightly.priority, "normal");
    }

    #[test]
    fn test_shipped_defaults_schedule_nothing() {
        let config = Config::from_toml_str(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.queue.max_concurrent_tasks, 4);
        assert!(!config.scheduler.tasks.is_empty());
        assert!(config.scheduler.tasks.iter().all(|task| !task.enabled));
    }

    #[test]
    fn test_breaker_overrides() {
        let config = Config::from_toml_str(
            r"
            [rate_limit.server_error_breaker]
            failure_threshold = 2
            recovery_timeout_secs = 5
            ",
        )
        .unwrap();
        assert_eq!(config.rate_limit.server_error_breaker.failure_threshold, 2);
        assert_eq!(config.rate_limit.rate_limit_breaker.failure_threshold, 3);
    }
}

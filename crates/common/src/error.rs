//! Error types for matchwatch.

use std::time::Duration;

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Boxed error returned by task handlers and other dynamic collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Setup Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No handler registered for task type: {0}")]
    UnknownTaskType(String),

    // === Rate Limiting ===
    #[error("Rate limit exceeded: {reason}")]
    RateLimitExceeded {
        /// Why the call was denied (open breaker, exhausted quota, 429).
        reason: String,
        /// Suggested delay before the caller tries again, when known.
        retry_after: Option<Duration>,
    },

    // === Queue Errors ===
    #[error("Task queue is not running")]
    QueueNotRunning,

    #[error("Task queue is full ({0} pending tasks)")]
    QueueFull(usize),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A task handler returned an error or panicked. Displays the
    /// handler's own message.
    #[error("{0}")]
    Handler(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // === External / Internal ===
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a rate-limit denial.
    #[must_use]
    pub fn rate_limited(reason: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimitExceeded {
            reason: reason.into(),
            retry_after,
        }
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::UnknownTaskType(_) => "UNKNOWN_TASK_TYPE",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::QueueNotRunning => "QUEUE_NOT_RUNNING",
            Self::QueueFull(_) => "QUEUE_FULL",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Handler(_) => "HANDLER_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Setup errors are fatal and never retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. }
                | Self::QueueFull(_)
                | Self::Handler(_)
                | Self::Timeout(_)
                | Self::ExternalService(_)
        )
    }

    /// Suggested retry delay carried by a rate-limit denial.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

// === From implementations ===

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::QueueNotRunning.error_code(), "QUEUE_NOT_RUNNING");
        assert_eq!(
            AppError::rate_limited("breaker open", None).error_code(),
            "RATE_LIMIT_EXCEEDED"
        );
        assert_eq!(
            AppError::UnknownTaskType("x".into()).error_code(),
            "UNKNOWN_TASK_TYPE"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(AppError::rate_limited("quota", Some(Duration::from_secs(1))).is_retryable());
        assert!(AppError::Timeout("api".into()).is_retryable());
        assert!(!AppError::Config("bad".into()).is_retryable());
        assert!(!AppError::QueueNotRunning.is_retryable());
    }

    #[test]
    fn test_handler_error_keeps_message() {
        let err = AppError::Handler("upstream unavailable".into());
        assert_eq!(err.to_string(), "upstream unavailable");
        assert_eq!(err.error_code(), "HANDLER_ERROR");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = AppError::rate_limited("429", Some(Duration::from_secs(7)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(AppError::QueueNotRunning.retry_after(), None);
        assert_eq!(err.to_string(), "Rate limit exceeded: 429");
    }
}

//! Background task model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use matchwatch_common::AppError;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Task payloads and results: a JSON object.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Retries granted when the submitter does not choose.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Opaque task identifier (lowercase ULID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh id. Ids sort by creation millisecond.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Task priority. Higher priorities are dequeued first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(AppError::Config(format!("unknown task priority: {other}"))),
        }
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    /// Whether the task will never run again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundTask {
    pub id: TaskId,
    pub task_type: String,
    pub priority: TaskPriority,
    pub payload: Payload,
    /// Attempts made after the first one.
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Last time the task entered the pending heap.
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<Payload>,
}

impl BackgroundTask {
    /// Create a pending task with normal priority.
    #[must_use]
    pub fn new(task_type: impl Into<String>, payload: Payload) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            task_type: task_type.into(),
            priority: TaskPriority::Normal,
            payload,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            status: TaskStatus::Pending,
            created_at: now,
            queued_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether another attempt is allowed after a failure.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Status report for this task.
    #[must_use]
    pub fn report(&self) -> TaskStatusReport {
        TaskStatusReport {
            task_id: self.id.clone(),
            found: true,
            task_type: Some(self.task_type.clone()),
            status: Some(self.status),
            priority: Some(self.priority),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            error: self.error_message.clone(),
            result: self.result.clone(),
            created_at: Some(self.created_at),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// What a submitter sees when polling a task.
///
/// Unknown ids produce a report with `found == false` rather than an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusReport {
    pub task_id: TaskId,
    pub found: bool,
    pub task_type: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub result: Option<Payload>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskStatusReport {
    /// Report for an id the queue does not know.
    #[must_use]
    pub const fn not_found(task_id: TaskId) -> Self {
        Self {
            task_id,
            found: false,
            task_type: None,
            status: None,
            priority: None,
            retry_count: 0,
            max_retries: 0,
            error: None,
            result: None,
            created_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the task reached COMPLETED or FAILED.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(TaskStatus::is_terminal)
    }
}

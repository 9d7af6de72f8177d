//! Completed task retention job.

use serde::{Deserialize, Serialize};

use super::TaskJob;

/// Evict completed tasks older than `retention_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupCompletedTasksJob {
    pub retention_secs: u64,
}

impl TaskJob for CleanupCompletedTasksJob {
    const TASK_TYPE: &'static str = "cleanup_completed_tasks";
}

//! Completed task retention worker.

use std::time::Duration;

use async_trait::async_trait;
use matchwatch_common::BoxError;
use tracing::info;

use crate::handler::TaskHandler;
use crate::jobs::{CleanupCompletedTasksJob, TaskJob};
use crate::queue::WeakTaskQueue;
use crate::task::Payload;

/// Evicts completed tasks older than the retention in its payload.
///
/// Holds a [`WeakTaskQueue`] since the queue owns this handler.
pub struct CleanupWorker {
    queue: WeakTaskQueue,
}

impl CleanupWorker {
    #[must_use]
    pub const fn new(queue: WeakTaskQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl TaskHandler for CleanupWorker {
    async fn handle(&self, payload: Payload) -> Result<Payload, BoxError> {
        let job = CleanupCompletedTasksJob::from_payload(payload)?;
        let queue = self.queue.upgrade().ok_or("task queue dropped")?;

        let removed = queue
            .cleanup_completed(Duration::from_secs(job.retention_secs))
            .await;
        info!(removed, retention_secs = job.retention_secs, "Completed tasks cleaned up");

        let mut result = Payload::new();
        result.insert("removed".to_string(), removed.into());
        Ok(result)
    }
}

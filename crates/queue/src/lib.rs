//! Background execution for matchwatch.
//!
//! - **Tasks**: [`BackgroundTask`] with priority, payload and retry state
//! - **Queue**: [`TaskQueue`], a priority heap drained by a fixed worker pool,
//!   with exponential backoff between attempts
//! - **Scheduler**: [`TaskScheduler`], fixed-delay recurring tasks
//! - **Manager**: [`WorkerManager`], owns both and runs health checks
//! - **Jobs**: typed payloads parsed at the handler boundary
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use matchwatch_common::{AppResult, BoxError, Config, Metrics};
//! use matchwatch_queue::{Payload, TaskPriority, WorkerManager};
//!
//! async fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let manager = WorkerManager::from_config(&config, Arc::new(Metrics::new())).await?;
//!     manager.register_handler("ping", |payload: Payload| async move {
//!         Ok::<_, BoxError>(payload)
//!     });
//!     manager.start().await;
//!
//!     let id = manager
//!         .add_task("ping", Payload::new(), TaskPriority::Normal, None)
//!         .await?;
//!     let report = manager
//!         .wait_for_task_completion(&id, Duration::from_secs(5))
//!         .await?;
//!     println!("{:?}", report.status);
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```

pub mod handler;
pub mod jobs;
pub mod manager;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod workers;

pub use handler::TaskHandler;
pub use jobs::{
    AnalyzePlayersJob, CleanupCompletedTasksJob, FetchMatchHistoryJob, JobError, TaskJob,
};
pub use manager::{HealthReport, ManagerStats, SystemStats, WorkerConfig, WorkerManager};
pub use queue::{QueueConfig, QueueStats, TaskQueue, WeakTaskQueue};
pub use scheduler::{
    ScheduledTask, ScheduledTaskInfo, SchedulerConfig, SchedulerStats, TaskScheduler,
};
pub use task::{
    BackgroundTask, DEFAULT_MAX_RETRIES, Payload, TaskId, TaskPriority, TaskStatus,
    TaskStatusReport,
};
pub use workers::CleanupWorker;

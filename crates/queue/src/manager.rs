//! Worker manager: owns the queue and the scheduler, supervises both.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use matchwatch_common::config::WorkerSettings;
use matchwatch_common::metrics::MetricsSnapshot;
use matchwatch_common::{AppError, AppResult, Config, Metrics};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handler::TaskHandler;
use crate::jobs::{CleanupCompletedTasksJob, TaskJob};
use crate::queue::{QueueConfig, QueueStats, TaskQueue};
use crate::scheduler::{ScheduledTask, SchedulerConfig, SchedulerStats, TaskScheduler};
use crate::task::{BackgroundTask, Payload, TaskId, TaskPriority, TaskStatusReport};
use crate::workers::CleanupWorker;

/// Name of the built-in retention schedule.
pub const CLEANUP_SCHEDULE: &str = "cleanup_completed_tasks";

/// Supervision settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub health_check_interval: Duration,
    /// Recent failure rate above which the system is unhealthy.
    pub failure_rate_threshold: f64,
    /// Pending count above which the system is unhealthy.
    pub backlog_threshold: usize,
    /// Lateness tolerated before a scheduled task counts as overdue.
    pub overdue_grace: Duration,
    pub completed_retention: Duration,
    pub cleanup_interval: Duration,
    /// Poll step of [`WorkerManager::wait_for_task_completion`].
    pub wait_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&WorkerSettings::default())
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            health_check_interval: Duration::from_secs(settings.health_check_interval_secs),
            failure_rate_threshold: settings.failure_rate_threshold,
            backlog_threshold: settings.backlog_threshold,
            overdue_grace: Duration::from_secs(settings.overdue_grace_secs),
            completed_retention: Duration::from_secs(settings.completed_retention_secs),
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_secs),
            wait_poll_interval: Duration::from_millis(settings.wait_poll_interval_ms),
        }
    }
}

/// Result of one health evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Manager section of [`SystemStats`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub running: bool,
    pub healthy: bool,
    pub issues: Vec<String>,
    pub health_checks: u64,
    pub uptime_secs: f64,
    pub metrics: MetricsSnapshot,
}

/// Aggregated view over every component.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub queue: QueueStats,
    pub scheduler: SchedulerStats,
    pub manager: ManagerStats,
}

/// Evaluates system health. Shared by the manager and its health loop.
#[derive(Clone)]
struct HealthChecker {
    queue: TaskQueue,
    scheduler: TaskScheduler,
    config: WorkerConfig,
    checks: Arc<AtomicU64>,
}

impl HealthChecker {
    async fn check(&self) -> HealthReport {
        self.checks.fetch_add(1, Ordering::Relaxed);
        let mut issues = Vec::new();

        if !self.queue.is_running() {
            issues.push("task queue is not running".to_string());
        }
        if !self.scheduler.is_running() {
            issues.push("task scheduler is not running".to_string());
        }

        let overdue = self.scheduler.overdue_tasks(self.config.overdue_grace).await;
        if !overdue.is_empty() {
            issues.push(format!("scheduled tasks overdue: {}", overdue.join(", ")));
        }

        let failure_rate = self.queue.recent_failure_rate().await;
        if failure_rate > self.config.failure_rate_threshold {
            issues.push(format!(
                "task failure rate {:.1}% exceeds {:.1}%",
                failure_rate * 100.0,
                self.config.failure_rate_threshold * 100.0
            ));
        }

        let pending = self.queue.pending_count().await;
        if pending > self.config.backlog_threshold {
            issues.push(format!(
                "task backlog {pending} exceeds {}",
                self.config.backlog_threshold
            ));
        }

        HealthReport {
            healthy: issues.is_empty(),
            issues,
            checked_at: Utc::now(),
        }
    }
}

/// Composition root for background execution.
pub struct WorkerManager {
    queue: TaskQueue,
    scheduler: TaskScheduler,
    health: HealthChecker,
    metrics: Arc<Metrics>,
    running: AtomicBool,
    started_at: std::sync::Mutex<Option<Instant>>,
    health_token: std::sync::Mutex<CancellationToken>,
    health_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerManager {
    /// Build the queue and scheduler and register the retention job.
    pub async fn new(
        queue_config: QueueConfig,
        scheduler_config: SchedulerConfig,
        config: WorkerConfig,
        metrics: Arc<Metrics>,
    ) -> AppResult<Self> {
        if config.wait_poll_interval.is_zero() || config.health_check_interval.is_zero() {
            return Err(AppError::Config(
                "worker poll and health check intervals must be positive".to_string(),
            ));
        }

        let queue = TaskQueue::new(queue_config, Arc::clone(&metrics))?;
        let scheduler = TaskScheduler::new(scheduler_config, queue.clone());

        queue.register_handler(
            CleanupCompletedTasksJob::TASK_TYPE,
            CleanupWorker::new(queue.downgrade()),
        );
        let payload = CleanupCompletedTasksJob {
            retention_secs: config.completed_retention.as_secs(),
        }
        .into_payload()
        .map_err(|e| AppError::Internal(e.to_string()))?;
        let cleanup = ScheduledTask::new(
            CLEANUP_SCHEDULE,
            CleanupCompletedTasksJob::TASK_TYPE,
            config.cleanup_interval,
        )?
        .with_payload(payload)
        .with_priority(TaskPriority::Low)
        .with_max_retries(0);
        scheduler.add_task(cleanup).await;

        Ok(Self {
            health: HealthChecker {
                queue: queue.clone(),
                scheduler: scheduler.clone(),
                config,
                checks: Arc::new(AtomicU64::new(0)),
            },
            queue,
            scheduler,
            metrics,
            running: AtomicBool::new(false),
            started_at: std::sync::Mutex::new(None),
            health_token: std::sync::Mutex::new(CancellationToken::new()),
            health_handle: Mutex::new(None),
        })
    }

    /// Build from application config, including its scheduled tasks.
    pub async fn from_config(config: &Config, metrics: Arc<Metrics>) -> AppResult<Self> {
        let manager = Self::new(
            QueueConfig::from(&config.queue),
            SchedulerConfig::from(&config.scheduler),
            WorkerConfig::from(&config.worker),
            metrics,
        )
        .await?;

        for settings in &config.scheduler.tasks {
            manager
                .scheduler
                .add_task(ScheduledTask::from_settings(settings)?)
                .await;
        }
        Ok(manager)
    }

    #[must_use]
    pub const fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    #[must_use]
    pub const fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register the handler for `task_type`.
    pub fn register_handler<H>(&self, task_type: impl Into<String>, handler: H)
    where
        H: TaskHandler + 'static,
    {
        self.queue.register_handler(task_type, handler);
    }

    /// Start the queue, the scheduler and the health loop.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Worker manager already running");
            return;
        }

        self.queue.start().await;
        self.scheduler.start().await;

        *self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        let token = CancellationToken::new();
        *self
            .health_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();
        let handle = tokio::spawn(health_loop(self.health.clone(), token));
        *self.health_handle.lock().await = Some(handle);

        info!("Worker manager started");
    }

    /// Stop the scheduler, drain the queue, then stop the health loop.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Worker manager already stopped");
            return;
        }

        info!("Stopping worker manager");
        self.scheduler.stop().await;
        self.queue.stop().await;

        self.health_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        let handle = self.health_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Health check loop exited abnormally");
            }
        }

        *self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        info!("Worker manager stopped");
    }

    /// Start, wait for `shutdown`, then stop.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start().await;
        shutdown.await;
        info!("Shutdown signal received");
        self.stop().await;
    }

    /// Evaluate health now. Never fails.
    pub async fn health_check(&self) -> HealthReport {
        self.health.check().await
    }

    /// Submit a task; `max_retries` falls back to the queue default.
    pub async fn add_task(
        &self,
        task_type: impl Into<String>,
        payload: Payload,
        priority: TaskPriority,
        max_retries: Option<u32>,
    ) -> AppResult<TaskId> {
        let max_retries = max_retries.unwrap_or(self.queue.config().default_max_retries);
        let task = BackgroundTask::new(task_type, payload)
            .with_priority(priority)
            .with_max_retries(max_retries);
        self.queue.add_task(task).await
    }

    /// Submit a task with high priority.
    pub async fn run_immediate_task(
        &self,
        task_type: impl Into<String>,
        payload: Payload,
    ) -> AppResult<TaskId> {
        self.add_task(task_type, payload, TaskPriority::High, None)
            .await
    }

    pub async fn get_task_status(&self, task_id: &TaskId) -> TaskStatusReport {
        self.queue.get_task_status(task_id).await
    }

    /// Poll until the task is COMPLETED or FAILED.
    ///
    /// Returns [`AppError::NotFound`] for unknown ids and [`AppError::Timeout`]
    /// when `timeout` elapses first. A timeout too large to represent as a
    /// deadline waits indefinitely.
    pub async fn wait_for_task_completion(
        &self,
        task_id: &TaskId,
        timeout: Duration,
    ) -> AppResult<TaskStatusReport> {
        let deadline = Instant::now().checked_add(timeout);
        let step = self.health.config.wait_poll_interval;

        loop {
            let report = self.queue.get_task_status(task_id).await;
            if !report.found {
                return Err(AppError::NotFound(format!("task {task_id}")));
            }
            if report.is_terminal() {
                return Ok(report);
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(AppError::Timeout(format!(
                        "task {task_id} still {} after {:.1}s",
                        report.status.map_or("unknown", |s| s.as_str()),
                        timeout.as_secs_f64()
                    )));
                }
                Some(deadline) => step.min(deadline - now),
                None => step,
            };
            sleep(pause).await;
        }
    }

    /// Register a recurring task. Returns `false` if the name is taken.
    pub async fn add_scheduled_task(&self, task: ScheduledTask) -> bool {
        self.scheduler.add_task(task).await
    }

    pub async fn enable_scheduled_task(&self, name: &str) -> AppResult<()> {
        self.scheduler.enable_task(name).await
    }

    pub async fn disable_scheduled_task(&self, name: &str) -> AppResult<()> {
        self.scheduler.disable_task(name).await
    }

    pub async fn reschedule_task(&self, name: &str, interval: Duration) -> AppResult<()> {
        self.scheduler.reschedule_task(name, interval).await
    }

    pub async fn run_scheduled_task_now(&self, name: &str) -> AppResult<TaskId> {
        self.scheduler.run_task_now(name).await
    }

    /// Queue, scheduler and manager statistics in one view.
    pub async fn get_system_stats(&self) -> SystemStats {
        let queue = self.queue.get_stats().await;
        let scheduler = self.scheduler.get_stats().await;
        let health = self.health.check().await;
        let uptime_secs = self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map_or(0.0, |at| at.elapsed().as_secs_f64());

        SystemStats {
            queue,
            scheduler,
            manager: ManagerStats {
                running: self.is_running(),
                healthy: health.healthy,
                issues: health.issues,
                health_checks: self.health.checks.load(Ordering::Relaxed),
                uptime_secs,
                metrics: self.metrics.snapshot(),
            },
        }
    }
}

async fn health_loop(checker: HealthChecker, shutdown: CancellationToken) {
    let mut ticker = interval(checker.config.health_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; components are still starting.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = checker.check().await;
        if report.healthy {
            debug!("Health check passed");
        } else {
            warn!(issues = ?report.issues, "Health check failed");
        }
    }

    debug!("Health check loop stopped");
}

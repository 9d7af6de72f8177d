//! Recurring task scheduler.
//!
//! Definitions are keyed by name. A single loop wakes at the poll interval,
//! or earlier when a definition changes or the next one falls due, and
//! enqueues every enabled definition whose `next_run` has passed.
//!
//! Scheduling is fixed-delay: after an enqueue, `next_run = now + interval`.
//! A long outage produces one run on resume, never a catch-up burst.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use matchwatch_common::config::{ScheduledTaskSettings, SchedulerSettings};
use matchwatch_common::{AppError, AppResult};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::TaskQueue;
use crate::task::{BackgroundTask, DEFAULT_MAX_RETRIES, Payload, TaskId, TaskPriority};

/// Stand-in due time for an interval the clock cannot represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// First due time for `interval` counted from `now`.
fn first_due(name: &str, interval: Duration, now: Instant) -> AppResult<Instant> {
    if interval.is_zero() {
        return Err(AppError::Config(format!(
            "scheduled task {name}: interval must be positive"
        )));
    }
    now.checked_add(interval).ok_or_else(|| {
        AppError::Config(format!(
            "scheduled task {name}: interval of {}s is out of range",
            interval.as_secs()
        ))
    })
}

fn saturating_due(now: Instant, interval: Duration) -> Instant {
    now.checked_add(interval).unwrap_or(now + FAR_FUTURE)
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Longest sleep between two checks.
    pub poll_interval: Duration,
    /// Pause after the loop itself fails.
    pub error_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            error_backoff: Duration::from_secs(settings.error_backoff_secs),
        }
    }
}

/// A named recurring task definition.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub name: String,
    pub task_type: String,
    pub interval: Duration,
    /// Copied into every spawned task.
    pub payload: Payload,
    pub priority: TaskPriority,
    pub enabled: bool,
    pub max_retries: u32,
    /// First run at registration instead of one interval later.
    pub run_immediately: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub failed_runs: u64,
    pub last_error: Option<String>,
    next_run: Instant,
}

impl ScheduledTask {
    /// Create an enabled definition with normal priority and an empty payload.
    pub fn new(
        name: impl Into<String>,
        task_type: impl Into<String>,
        interval: Duration,
    ) -> AppResult<Self> {
        let name = name.into();
        let next_run = first_due(&name, interval, Instant::now())?;
        Ok(Self {
            name,
            task_type: task_type.into(),
            interval,
            payload: Payload::new(),
            priority: TaskPriority::Normal,
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            run_immediately: false,
            last_run: None,
            total_runs: 0,
            failed_runs: 0,
            last_error: None,
            next_run,
        })
    }

    /// Build a definition from a `[[scheduler.tasks]]` entry.
    pub fn from_settings(settings: &ScheduledTaskSettings) -> AppResult<Self> {
        let task = Self::new(
            settings.name.clone(),
            settings.task_type.clone(),
            Duration::from_secs(settings.interval_secs),
        )?;
        Ok(task
            .with_payload(settings.payload.clone())
            .with_priority(settings.priority.parse()?)
            .with_max_retries(settings.max_retries)
            .enabled(settings.enabled)
            .run_immediately(settings.run_immediately))
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
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

    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn run_immediately(mut self, run_immediately: bool) -> Self {
        self.run_immediately = run_immediately;
        self
    }

    /// When the next run is due.
    #[must_use]
    pub const fn next_run(&self) -> Instant {
        self.next_run
    }

    /// Share of enqueue attempts that succeeded; 1.0 before the first run.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            return 1.0;
        }
        (self.total_runs - self.failed_runs) as f64 / self.total_runs as f64
    }

    fn spawn_task(&self) -> BackgroundTask {
        BackgroundTask::new(self.task_type.clone(), self.payload.clone())
            .with_priority(self.priority)
            .with_max_retries(self.max_retries)
    }

    fn overdue_by(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.next_run)
    }

    /// Serializable view.
    #[must_use]
    pub fn info(&self, now: Instant) -> ScheduledTaskInfo {
        ScheduledTaskInfo {
            name: self.name.clone(),
            task_type: self.task_type.clone(),
            interval_secs: self.interval.as_secs_f64(),
            priority: self.priority,
            enabled: self.enabled,
            last_run: self.last_run,
            next_run_in_secs: self.next_run.saturating_duration_since(now).as_secs_f64(),
            overdue_secs: self.overdue_by(now).as_secs_f64(),
            total_runs: self.total_runs,
            failed_runs: self.failed_runs,
            success_rate: self.success_rate(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time view of a scheduled task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTaskInfo {
    pub name: String,
    pub task_type: String,
    pub interval_secs: f64,
    pub priority: TaskPriority,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run_in_secs: f64,
    pub overdue_secs: f64,
    pub total_runs: u64,
    pub failed_runs: u64,
    pub success_rate: f64,
    pub last_error: Option<String>,
}

/// Scheduler statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub running: bool,
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub total_runs: u64,
    pub failed_runs: u64,
    pub success_rate: f64,
    /// Iterations that failed as a whole.
    pub loop_errors: u64,
    pub tasks: Vec<ScheduledTaskInfo>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    queue: TaskQueue,
    tasks: RwLock<BTreeMap<String, ScheduledTask>>,
    notify: Notify,
    running: AtomicBool,
    shutdown: std::sync::Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
    loop_errors: AtomicU64,
}

/// Turns recurring definitions into queued tasks. Cheap to clone.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    /// Create a stopped scheduler feeding `queue`.
    #[must_use]
    pub fn new(config: SchedulerConfig, queue: TaskQueue) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                queue,
                tasks: RwLock::new(BTreeMap::new()),
                notify: Notify::new(),
                running: AtomicBool::new(false),
                shutdown: std::sync::Mutex::new(CancellationToken::new()),
                handle: Mutex::new(None),
                loop_errors: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Register a definition. Returns `false` (and keeps the existing one)
    /// when the name is taken.
    pub async fn add_task(&self, mut task: ScheduledTask) -> bool {
        let mut tasks = self.inner.tasks.write().await;
        if tasks.contains_key(&task.name) {
            warn!(name = %task.name, "Scheduled task already exists, ignoring");
            return false;
        }

        let now = Instant::now();
        task.next_run = if task.run_immediately {
            now
        } else {
            saturating_due(now, task.interval)
        };
        info!(
            name = %task.name,
            task_type = %task.task_type,
            interval_secs = task.interval.as_secs_f64(),
            enabled = task.enabled,
            run_immediately = task.run_immediately,
            "Scheduled task registered"
        );
        tasks.insert(task.name.clone(), task);
        drop(tasks);

        self.inner.notify.notify_one();
        true
    }

    /// Remove a definition.
    pub async fn remove_task(&self, name: &str) -> AppResult<ScheduledTask> {
        let removed = self.inner.tasks.write().await.remove(name);
        let task = removed.ok_or_else(|| not_found(name))?;
        info!(name, "Scheduled task removed");
        Ok(task)
    }

    pub async fn enable_task(&self, name: &str) -> AppResult<()> {
        self.set_enabled(name, true).await
    }

    pub async fn disable_task(&self, name: &str) -> AppResult<()> {
        self.set_enabled(name, false).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> AppResult<()> {
        {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks.get_mut(name).ok_or_else(|| not_found(name))?;
            task.enabled = enabled;
        }
        info!(name, enabled, "Scheduled task toggled");
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Change the interval; the next run is one new interval from now.
    pub async fn reschedule_task(&self, name: &str, interval: Duration) -> AppResult<()> {
        let next_run = first_due(name, interval, Instant::now())?;
        {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks.get_mut(name).ok_or_else(|| not_found(name))?;
            task.interval = interval;
            task.next_run = next_run;
        }
        info!(name, interval_secs = interval.as_secs_f64(), "Scheduled task rescheduled");
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Enqueue a run right away. Counts as a run and restarts the interval.
    pub async fn run_task_now(&self, name: &str) -> AppResult<TaskId> {
        let task = {
            let tasks = self.inner.tasks.read().await;
            tasks.get(name).ok_or_else(|| not_found(name))?.spawn_task()
        };
        let result = self.inner.queue.add_task(task).await;
        self.inner.record_run(name, &result, Instant::now()).await;
        if result.is_ok() {
            info!(name, "Scheduled task run on demand");
            self.inner.notify.notify_one();
        }
        result
    }

    pub async fn get_task(&self, name: &str) -> Option<ScheduledTaskInfo> {
        let now = Instant::now();
        self.inner
            .tasks
            .read()
            .await
            .get(name)
            .map(|task| task.info(now))
    }

    /// All definitions, ordered by name.
    pub async fn list_tasks(&self) -> Vec<ScheduledTaskInfo> {
        let now = Instant::now();
        self.inner
            .tasks
            .read()
            .await
            .values()
            .map(|task| task.info(now))
            .collect()
    }

    /// Names of enabled definitions more than `grace` past their due time.
    pub async fn overdue_tasks(&self, grace: Duration) -> Vec<String> {
        let now = Instant::now();
        self.inner
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.enabled && task.overdue_by(now) > grace)
            .map(|task| task.name.clone())
            .collect()
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let tasks = self.list_tasks().await;
        let total_runs: u64 = tasks.iter().map(|t| t.total_runs).sum();
        let failed_runs: u64 = tasks.iter().map(|t| t.failed_runs).sum();
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total_runs == 0 {
            1.0
        } else {
            (total_runs - failed_runs) as f64 / total_runs as f64
        };

        SchedulerStats {
            running: self.is_running(),
            total_tasks: tasks.len(),
            enabled_tasks: tasks.iter().filter(|t| t.enabled).count(),
            total_runs,
            failed_runs,
            success_rate,
            loop_errors: self.inner.loop_errors.load(Ordering::Relaxed),
            tasks,
        }
    }

    /// Spawn the scheduling loop. Does nothing if already running.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return;
        }

        let token = CancellationToken::new();
        *self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();

        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), token));
        *self.inner.handle.lock().await = Some(handle);

        info!(
            poll_interval_secs = self.inner.config.poll_interval.as_secs_f64(),
            tasks = self.inner.tasks.read().await.len(),
            "Scheduler started"
        );
    }

    /// Stop the loop and wait for it to exit. Does nothing if already stopped.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("Scheduler already stopped");
            return;
        }

        self.inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();

        let handle = self.inner.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop exited abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

fn not_found(name: &str) -> AppError {
    AppError::NotFound(format!("scheduled task {name}"))
}

impl SchedulerInner {
    /// Enqueue every due definition. Returns how many were enqueued.
    async fn tick(&self) -> usize {
        let now = Instant::now();
        let due: Vec<(String, BackgroundTask)> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.enabled && task.next_run <= now)
            .map(|task| (task.name.clone(), task.spawn_task()))
            .collect();

        let mut enqueued = 0;
        for (name, task) in due {
            let result = self.queue.add_task(task).await;
            match &result {
                Ok(task_id) => {
                    enqueued += 1;
                    info!(name = %name, task_id = %task_id, "Scheduled task enqueued");
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "Failed to enqueue scheduled task");
                }
            }
            self.record_run(&name, &result, Instant::now()).await;
        }
        enqueued
    }

    async fn record_run(&self, name: &str, result: &AppResult<TaskId>, now: Instant) {
        let mut tasks = self.tasks.write().await;
        // Removed while the enqueue was in flight.
        let Some(task) = tasks.get_mut(name) else {
            return;
        };

        task.total_runs += 1;
        match result {
            Ok(_) => {
                task.last_run = Some(Utc::now());
                task.next_run = saturating_due(now, task.interval);
                task.last_error = None;
            }
            Err(e) => {
                task.failed_runs += 1;
                task.last_error = Some(e.to_string());
            }
        }
    }

    /// How long to sleep before the next check.
    async fn next_wake(&self) -> Duration {
        let now = Instant::now();
        self.tasks
            .read()
            .await
            .values()
            .filter(|task| task.enabled && task.next_run > now)
            .map(|task| task.next_run - now)
            .min()
            .map_or(self.config.poll_interval, |due| due.min(self.config.poll_interval))
    }
}

async fn run_loop(inner: Arc<SchedulerInner>, shutdown: CancellationToken) {
    debug!("Scheduler loop started");

    loop {
        let pause = match AssertUnwindSafe(inner.tick()).catch_unwind().await {
            Ok(enqueued) => {
                if enqueued > 0 {
                    debug!(enqueued, "Scheduler tick complete");
                }
                inner.next_wake().await
            }
            Err(_) => {
                inner.loop_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    backoff_secs = inner.config.error_backoff.as_secs_f64(),
                    "Scheduler iteration panicked, backing off"
                );
                inner.config.error_backoff
            }
        };

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = inner.notify.notified() => {}
            () = sleep(pause) => {}
        }
    }

    debug!("Scheduler loop stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::queue::QueueConfig;
    use matchwatch_common::{BoxError, Metrics};

    fn noop_queue() -> TaskQueue {
        let queue = TaskQueue::new(QueueConfig::default(), Arc::new(Metrics::new())).unwrap();
        queue.register_handler("noop", |payload: Payload| async move {
            Ok::<_, BoxError>(payload)
        });
        queue
    }

    fn scheduler(queue: TaskQueue) -> TaskScheduler {
        TaskScheduler::new(
            SchedulerConfig {
                poll_interval: Duration::from_secs(10),
                error_backoff: Duration::from_secs(60),
            },
            queue,
        )
    }

    #[test]
    fn test_rejects_zero_interval() {
        assert!(ScheduledTask::new("x", "noop", Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_unrepresentable_interval() {
        assert!(matches!(
            ScheduledTask::new("x", "noop", Duration::MAX),
            Err(AppError::Config(_))
        ));

        let settings = ScheduledTaskSettings {
            name: "huge".to_string(),
            task_type: "noop".to_string(),
            interval_secs: u64::MAX,
            payload: Payload::new(),
            priority: "normal".to_string(),
            enabled: true,
            run_immediately: false,
            max_retries: 0,
        };
        assert!(matches!(
            ScheduledTask::from_settings(&settings),
            Err(AppError::Config(_))
        ));

        let scheduler = scheduler(noop_queue());
        scheduler
            .add_task(ScheduledTask::new("a", "noop", Duration::from_secs(5)).unwrap())
            .await;
        assert!(matches!(
            scheduler.reschedule_task("a", Duration::MAX).await,
            Err(AppError::Config(_))
        ));
        let info = scheduler.get_task("a").await.unwrap();
        assert!((info.interval_secs - 5.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_interval_never_falls_due() {
        let queue = noop_queue();
        queue.start().await;
        let scheduler = scheduler(queue.clone());
        let mut task = ScheduledTask::new("a", "noop", Duration::from_secs(5))
            .unwrap()
            .run_immediately(true);
        task.interval = Duration::MAX;
        scheduler.add_task(task).await;

        assert_eq!(scheduler.inner.tick().await, 1);
        let info = scheduler.get_task("a").await.unwrap();
        assert_eq!(info.total_runs, 1);
        assert!(info.next_run_in_secs > 86_400.0);
        queue.stop().await;
    }

    #[test]
    fn test_from_settings() {
        let settings = ScheduledTaskSettings {
            name: "refresh".to_string(),
            task_type: "noop".to_string(),
            interval_secs: 900,
            payload: Payload::new(),
            priority: "high".to_string(),
            enabled: false,
            run_immediately: true,
            max_retries: 1,
        };
        let task = ScheduledTask::from_settings(&settings).unwrap();
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.interval, Duration::from_secs(900));
        assert!(!task.enabled);
        assert!(task.run_immediately);
        assert_eq!(task.max_retries, 1);

        let bad = ScheduledTaskSettings {
            priority: "whenever".to_string(),
            ..settings
        };
        assert!(ScheduledTask::from_settings(&bad).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_names_are_ignored() {
        let scheduler = scheduler(noop_queue());
        let first = ScheduledTask::new("a", "noop", Duration::from_secs(5)).unwrap();
        let second = ScheduledTask::new("a", "other", Duration::from_secs(9)).unwrap();
        assert!(scheduler.add_task(first).await);
        assert!(!scheduler.add_task(second).await);
        assert_eq!(scheduler.get_task("a").await.unwrap().task_type, "noop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_names_are_not_found() {
        let scheduler = scheduler(noop_queue());
        assert!(matches!(
            scheduler.enable_task("ghost").await,
            Err(AppError::NotFound(_))
        ));
        assert!(scheduler.disable_task("ghost").await.is_err());
        assert!(scheduler.remove_task("ghost").await.is_err());
        assert!(scheduler.run_task_now("ghost").await.is_err());
        assert!(
            scheduler
                .reschedule_task("ghost", Duration::from_secs(1))
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_enqueue_counts_and_keeps_due_time() {
        // Queue never started: every enqueue fails.
        let scheduler = scheduler(noop_queue());
        let task = ScheduledTask::new("a", "noop", Duration::from_secs(5))
            .unwrap()
            .run_immediately(true);
        scheduler.add_task(task).await;

        assert_eq!(scheduler.inner.tick().await, 0);
        let info = scheduler.get_task("a").await.unwrap();
        assert_eq!(info.total_runs, 1);
        assert_eq!(info.failed_runs, 1);
        assert!(info.last_run.is_none());
        assert!(info.last_error.is_some());
        assert!(info.next_run_in_secs.abs() < f64::EPSILON);
        assert!(scheduler.get_task("a").await.unwrap().success_rate < 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_task_now_restarts_interval() {
        let queue = noop_queue();
        queue.start().await;
        let scheduler = scheduler(queue.clone());
        scheduler
            .add_task(ScheduledTask::new("a", "noop", Duration::from_secs(60)).unwrap())
            .await;

        sleep(Duration::from_secs(50)).await;
        scheduler.run_task_now("a").await.unwrap();

        let info = scheduler.get_task("a").await.unwrap();
        assert_eq!(info.total_runs, 1);
        assert!(info.last_run.is_some());
        assert!((info.next_run_in_secs - 60.0).abs() < 0.01);
        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_and_disable() {
        let scheduler = scheduler(noop_queue());
        scheduler
            .add_task(ScheduledTask::new("a", "noop", Duration::from_secs(1)).unwrap())
            .await;

        // Loop not running, so nothing advances next_run.
        sleep(Duration::from_secs(400)).await;
        assert_eq!(
            scheduler.overdue_tasks(Duration::from_secs(300)).await,
            vec!["a".to_string()]
        );

        scheduler.disable_task("a").await.unwrap();
        assert!(scheduler.overdue_tasks(Duration::from_secs(300)).await.is_empty());

        scheduler.enable_task("a").await.unwrap();
        scheduler
            .reschedule_task("a", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(scheduler.overdue_tasks(Duration::ZERO).await.is_empty());
        assert!(
            scheduler
                .reschedule_task("a", Duration::ZERO)
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats() {
        let queue = noop_queue();
        queue.start().await;
        let scheduler = scheduler(queue.clone());
        scheduler
            .add_task(ScheduledTask::new("a", "noop", Duration::from_secs(5)).unwrap())
            .await;
        scheduler
            .add_task(
                ScheduledTask::new("b", "noop", Duration::from_secs(5))
                    .unwrap()
                    .enabled(false),
            )
            .await;
        scheduler.run_task_now("a").await.unwrap();

        let stats = scheduler.get_stats().await;
        assert!(!stats.running);
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.enabled_tasks, 1);
        assert_eq!(stats.total_runs, 1);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
        queue.stop().await;
    }
}

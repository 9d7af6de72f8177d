//! Priority task queue with a fixed pool of workers.
//!
//! Tasks wait in a binary heap ordered by priority, then by enqueue order.
//! `max_concurrent_tasks` worker loops pop from the heap, run the registered
//! handler and retry failures with exponential backoff.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use matchwatch_common::config::QueueSettings;
use matchwatch_common::{AppError, AppResult, Metrics, RetryConfig};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handler::TaskHandler;
use crate::task::{BackgroundTask, TaskId, TaskStatus, TaskStatusReport};

/// Terminal outcomes kept for the recent failure rate.
const RECENT_OUTCOMES: usize = 100;

/// Task queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of worker loops.
    pub max_concurrent_tasks: usize,
    /// How long an idle worker waits before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// How long `stop` waits for in-flight tasks.
    pub shutdown_grace: Duration,
    /// Pending tasks allowed before `add_task` rejects; unbounded when `None`.
    pub max_pending: Option<usize>,
    /// Finished tasks retained for status lookups.
    pub max_completed_tasks: usize,
    /// Retries for tasks submitted without an explicit count.
    pub default_max_retries: u32,
    /// Backoff between attempts.
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_concurrent_tasks: settings.max_concurrent_tasks,
            poll_timeout: Duration::from_millis(settings.poll_timeout_ms),
            shutdown_grace: Duration::from_secs(settings.shutdown_grace_secs),
            max_pending: settings.max_pending,
            max_completed_tasks: settings.max_completed_tasks,
            default_max_retries: settings.default_max_retries,
            retry: RetryConfig {
                initial_delay: Duration::from_millis(settings.retry_base_ms),
                max_delay: Duration::from_secs(settings.retry_max_secs),
                multiplier: 2.0,
                jitter: Duration::from_millis(settings.retry_jitter_ms),
            },
        }
    }
}

/// Heap entry: higher priority first, then lower sequence number.
struct QueuedTask {
    seq: u64,
    task: BackgroundTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct Totals {
    added: u64,
    completed: u64,
    failed: u64,
    retried: u64,
    executions: u64,
    execution_time: Duration,
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<QueuedTask>,
    next_seq: u64,
    /// Status of every task not yet terminal.
    active: HashMap<TaskId, TaskStatusReport>,
    /// Terminal tasks, evicted oldest first.
    completed: HashMap<TaskId, BackgroundTask>,
    completed_order: VecDeque<TaskId>,
    /// `true` for a failure.
    recent_outcomes: VecDeque<bool>,
    totals: Totals,
}

impl QueueState {
    fn push(&mut self, mut task: BackgroundTask) {
        task.queued_at = Utc::now();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.active.insert(task.id.clone(), task.report());
        self.pending.push(QueuedTask { seq, task });
    }

    fn pop(&mut self) -> Option<BackgroundTask> {
        let mut task = self.pending.pop()?.task;
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        self.active.insert(task.id.clone(), task.report());
        Some(task)
    }

    fn finish(&mut self, task: BackgroundTask, max_completed: usize) {
        let failed = task.status == TaskStatus::Failed;
        if failed {
            self.totals.failed += 1;
        } else {
            self.totals.completed += 1;
        }
        if self.recent_outcomes.len() == RECENT_OUTCOMES {
            self.recent_outcomes.pop_front();
        }
        self.recent_outcomes.push_back(failed);

        self.active.remove(&task.id);
        self.completed_order.push_back(task.id.clone());
        self.completed.insert(task.id.clone(), task);

        while self.completed.len() > max_completed {
            let Some(oldest) = self.completed_order.pop_front() else {
                break;
            };
            self.completed.remove(&oldest);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn recent_failure_rate(&self) -> f64 {
        if self.recent_outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.recent_outcomes.iter().filter(|&&failed| failed).count();
        failures as f64 / self.recent_outcomes.len() as f64
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub running: bool,
    pub workers: usize,
    /// Tasks waiting in the heap.
    pub pending: usize,
    /// Tasks a worker is executing right now.
    pub active: usize,
    /// Terminal tasks retained for lookups.
    pub retained: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub total_added: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub average_execution_ms: f64,
    /// Failure share of the last 100 terminal outcomes.
    pub recent_failure_rate: f64,
    pub handlers: Vec<String>,
}

struct QueueInner {
    config: QueueConfig,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    state: Mutex<QueueState>,
    notify: Notify,
    running: AtomicBool,
    shutdown: std::sync::Mutex<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<Metrics>,
}

/// Priority task queue. Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

/// Non-owning handle to a [`TaskQueue`], for handlers that act on their own queue.
#[derive(Clone)]
pub struct WeakTaskQueue {
    inner: Weak<QueueInner>,
}

impl WeakTaskQueue {
    /// The queue, if it still exists.
    #[must_use]
    pub fn upgrade(&self) -> Option<TaskQueue> {
        self.inner.upgrade().map(|inner| TaskQueue { inner })
    }
}

impl TaskQueue {
    /// Create a stopped queue.
    pub fn new(config: QueueConfig, metrics: Arc<Metrics>) -> AppResult<Self> {
        if config.max_concurrent_tasks == 0 {
            return Err(AppError::Config(
                "queue.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if config.poll_timeout.is_zero() {
            return Err(AppError::Config(
                "queue.poll_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(QueueInner {
                config,
                handlers: RwLock::new(HashMap::new()),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                running: AtomicBool::new(false),
                shutdown: std::sync::Mutex::new(CancellationToken::new()),
                workers: Mutex::new(Vec::new()),
                metrics,
            }),
        })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakTaskQueue {
        WeakTaskQueue {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register the handler for `task_type`, replacing any previous one.
    pub fn register_handler<H>(&self, task_type: impl Into<String>, handler: H)
    where
        H: TaskHandler + 'static,
    {
        let task_type = task_type.into();
        let previous = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_type.clone(), Arc::new(handler));

        if previous.is_some() {
            warn!(task_type = %task_type, "Replacing existing task handler");
        } else {
            debug!(task_type = %task_type, "Registered task handler");
        }
    }

    #[must_use]
    pub fn has_handler(&self, task_type: &str) -> bool {
        self.inner.handler(task_type).is_some()
    }

    /// Registered task types, sorted.
    #[must_use]
    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(AtomicOrdering::SeqCst)
    }

    /// Spawn the worker loops. Does nothing if already running.
    pub async fn start(&self) {
        if self.inner.running.swap(true, AtomicOrdering::SeqCst) {
            debug!("Task queue already running");
            return;
        }

        let token = CancellationToken::new();
        *self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();

        let worker_count = self.inner.config.max_concurrent_tasks;
        let mut workers = self.inner.workers.lock().await;
        for worker_id in 0..worker_count {
            workers.push(tokio::spawn(worker_loop(
                Arc::clone(&self.inner),
                worker_id,
                token.clone(),
            )));
        }

        info!(
            workers = worker_count,
            handlers = ?self.handler_types(),
            "Task queue started"
        );
    }

    /// Stop accepting work and wait up to the grace period for running tasks.
    ///
    /// Tasks still running afterwards are logged as abandoned and keep status
    /// RUNNING. Does nothing if already stopped.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, AtomicOrdering::SeqCst) {
            debug!("Task queue already stopped");
            return;
        }

        info!("Stopping task queue");
        self.inner.shutdown_token().cancel();

        let workers = std::mem::take(&mut *self.inner.workers.lock().await);
        let grace = self.inner.config.shutdown_grace;

        match timeout(grace, join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Task worker exited abnormally");
                    }
                }
            }
            Err(_) => {
                let abandoned: Vec<(TaskId, Option<String>)> = {
                    let state = self.inner.state.lock().await;
                    state
                        .active
                        .values()
                        .filter(|report| report.status == Some(TaskStatus::Running))
                        .map(|report| (report.task_id.clone(), report.task_type.clone()))
                        .collect()
                };
                for (task_id, task_type) in &abandoned {
                    error!(
                        task_id = %task_id,
                        task_type = task_type.as_deref().unwrap_or_default(),
                        "Task still running after shutdown grace period, abandoning"
                    );
                }
                self.inner
                    .metrics
                    .record_tasks_abandoned(abandoned.len() as u64);
                warn!(
                    grace_secs = grace.as_secs_f64(),
                    abandoned = abandoned.len(),
                    "Task queue shutdown grace period elapsed"
                );
            }
        }

        info!("Task queue stopped");
    }

    /// Enqueue a task.
    ///
    /// Fails with [`AppError::QueueNotRunning`] on a stopped queue,
    /// [`AppError::UnknownTaskType`] when no handler is registered and
    /// [`AppError::QueueFull`] when `max_pending` is reached.
    pub async fn add_task(&self, mut task: BackgroundTask) -> AppResult<TaskId> {
        if !self.is_running() {
            self.inner.metrics.record_task_rejected();
            warn!(task_type = %task.task_type, "Rejected task, queue is not running");
            return Err(AppError::QueueNotRunning);
        }
        if !self.has_handler(&task.task_type) {
            self.inner.metrics.record_task_rejected();
            warn!(task_type = %task.task_type, "Rejected task, no handler registered");
            return Err(AppError::UnknownTaskType(task.task_type));
        }

        let mut state = self.inner.state.lock().await;
        if let Some(max_pending) = self.inner.config.max_pending {
            if state.pending.len() >= max_pending {
                drop(state);
                self.inner.metrics.record_task_rejected();
                warn!(
                    task_type = %task.task_type,
                    max_pending,
                    "Rejected task, queue is full"
                );
                return Err(AppError::QueueFull(max_pending));
            }
        }

        task.status = TaskStatus::Pending;
        let task_id = task.id.clone();
        debug!(
            task_id = %task_id,
            task_type = %task.task_type,
            priority = %task.priority,
            "Task enqueued"
        );
        state.totals.added += 1;
        state.push(task);
        drop(state);

        self.inner.notify.notify_one();
        self.inner.metrics.record_task_enqueued();
        Ok(task_id)
    }

    /// Status of a task; `found == false` for unknown or evicted ids.
    pub async fn get_task_status(&self, task_id: &TaskId) -> TaskStatusReport {
        let state = self.inner.state.lock().await;
        if let Some(report) = state.active.get(task_id) {
            return report.clone();
        }
        state
            .completed
            .get(task_id)
            .map_or_else(|| TaskStatusReport::not_found(task_id.clone()), BackgroundTask::report)
    }

    /// Tasks waiting in the heap.
    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Failure share of the last 100 terminal outcomes.
    pub async fn recent_failure_rate(&self) -> f64 {
        self.inner.state.lock().await.recent_failure_rate()
    }

    /// Snapshot of queue counters.
    #[allow(clippy::cast_precision_loss)]
    pub async fn get_stats(&self) -> QueueStats {
        let handlers = self.handler_types();
        let state = self.inner.state.lock().await;

        let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
        let statuses = state
            .active
            .values()
            .filter_map(|report| report.status)
            .chain(state.completed.values().map(|task| task.status));
        for status in statuses {
            *status_counts.entry(status.as_str().to_string()).or_default() += 1;
        }

        let average_execution_ms = if state.totals.executions == 0 {
            0.0
        } else {
            state.totals.execution_time.as_secs_f64() * 1000.0 / state.totals.executions as f64
        };

        QueueStats {
            running: self.is_running(),
            workers: self.inner.config.max_concurrent_tasks,
            pending: state.pending.len(),
            active: status_counts
                .get(TaskStatus::Running.as_str())
                .copied()
                .unwrap_or_default(),
            retained: state.completed.len(),
            status_counts,
            total_added: state.totals.added,
            total_completed: state.totals.completed,
            total_failed: state.totals.failed,
            total_retried: state.totals.retried,
            average_execution_ms,
            recent_failure_rate: state.recent_failure_rate(),
            handlers,
        }
    }

    /// Drop retained terminal tasks that finished more than `older_than` ago.
    pub async fn cleanup_completed(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut state = self.inner.state.lock().await;
        let QueueState {
            completed,
            completed_order,
            ..
        } = &mut *state;

        let before = completed.len();
        completed.retain(|_, task| task.completed_at.is_none_or(|at| at >= cutoff));
        completed_order.retain(|id| completed.contains_key(id));
        let removed = before - completed.len();
        drop(state);

        if removed > 0 {
            info!(removed, "Cleaned up completed tasks");
        }
        removed
    }
}

impl QueueInner {
    fn handler(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .cloned()
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn execute(&self, mut task: BackgroundTask, worker_id: usize, shutdown: &CancellationToken) {
        let outcome = match self.handler(&task.task_type) {
            Some(handler) => {
                info!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    worker_id,
                    attempt = task.retry_count + 1,
                    "Running task"
                );
                self.metrics.record_task_started();
                let started = Instant::now();
                let outcome = AssertUnwindSafe(handler.handle(task.payload.clone()))
                    .catch_unwind()
                    .await;
                let elapsed = started.elapsed();

                self.metrics.record_task_execution(elapsed);
                {
                    let mut state = self.state.lock().await;
                    state.totals.executions += 1;
                    state.totals.execution_time += elapsed;
                }

                match outcome {
                    Ok(result) => result.map_err(|e| AppError::Handler(e.to_string())),
                    Err(panic) => Err(AppError::Handler(format!(
                        "handler panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                }
            }
            None => Err(AppError::UnknownTaskType(task.task_type.clone())),
        };

        match outcome {
            Ok(result) => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                task.error_message = None;
                task.completed_at = Some(Utc::now());
                info!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    retries = task.retry_count,
                    "Task completed"
                );
                self.metrics.record_task_finished(true);
                self.state
                    .lock()
                    .await
                    .finish(task, self.config.max_completed_tasks);
            }
            Err(err) if task.can_retry() => self.retry(task, &err, shutdown).await,
            Err(err) => {
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    retries = task.retry_count,
                    error = %err,
                    code = err.error_code(),
                    "Task failed permanently"
                );
                task.status = TaskStatus::Failed;
                task.error_message = Some(err.to_string());
                task.completed_at = Some(Utc::now());
                self.metrics.record_task_finished(false);
                self.state
                    .lock()
                    .await
                    .finish(task, self.config.max_completed_tasks);
            }
        }
    }

    async fn retry(&self, mut task: BackgroundTask, err: &AppError, shutdown: &CancellationToken) {
        task.retry_count += 1;
        task.status = TaskStatus::Retrying;
        let delay = self.config.retry.jittered_delay(task.retry_count);

        warn!(
            task_id = %task.id,
            task_type = %task.task_type,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Task failed, scheduling retry"
        );
        task.error_message = Some(err.to_string());

        {
            let mut state = self.state.lock().await;
            state.totals.retried += 1;
            state.active.insert(task.id.clone(), task.report());
        }
        self.metrics.record_task_retried();

        tokio::select! {
            () = sleep(delay) => {
                task.status = TaskStatus::Pending;
                self.state.lock().await.push(task);
                self.notify.notify_one();
            }
            () = shutdown.cancelled() => {
                debug!(task_id = %task.id, "Shutdown during retry backoff, returning task to queue");
                self.state.lock().await.push(task);
            }
        }
    }
}

async fn worker_loop(inner: Arc<QueueInner>, worker_id: usize, shutdown: CancellationToken) {
    debug!(worker_id, "Task worker started");

    while !shutdown.is_cancelled() {
        let next = inner.state.lock().await.pop();
        match next {
            Some(task) => inner.execute(task, worker_id, &shutdown).await,
            None => {
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = inner.notify.notified() => {}
                    () = sleep(inner.config.poll_timeout) => {}
                }
            }
        }
    }

    debug!(worker_id, "Task worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

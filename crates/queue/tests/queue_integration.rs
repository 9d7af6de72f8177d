//! Queue integration tests.
//!
//! These tests drive the queue, scheduler and manager together on a paused
//! clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use matchwatch_common::{BoxError, Metrics, RetryConfig};
use matchwatch_queue::{
    BackgroundTask, FetchMatchHistoryJob, Payload, QueueConfig, ScheduledTask, SchedulerConfig,
    TaskId, TaskJob, TaskPriority, TaskQueue, TaskScheduler, TaskStatus, WorkerConfig,
    WorkerManager,
};
use tokio::time::{Instant, sleep};

fn queue_config(workers: usize) -> QueueConfig {
    QueueConfig {
        max_concurrent_tasks: workers,
        retry: RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        },
        ..QueueConfig::default()
    }
}

fn named(name: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("name".to_string(), name.into());
    payload
}

async fn wait_all(queue: &TaskQueue, ids: &[TaskId]) {
    for id in ids {
        loop {
            let report = queue.get_task_status(id).await;
            if report.is_terminal() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }
}

#[allow(clippy::unwrap_used)]
#[tokio::test(start_paused = true)]
async fn test_higher_priority_jumps_the_line() {
    let queue = TaskQueue::new(queue_config(1), Arc::new(Metrics::new())).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&order);
    queue.register_handler("record", move |payload: Payload| {
        let seen = Arc::clone(&seen);
        async move {
            sleep(Duration::from_millis(100)).await;
            let name = payload["name"].as_str().unwrap_or_default().to_string();
            seen.lock().unwrap().push(name);
            Ok::<_, BoxError>(Payload::new())
        }
    });
    queue.start().await;

    let blocker = queue
        .add_task(BackgroundTask::new("record", named("blocker")))
        .await
        .unwrap();
    // Let the single worker pick up the blocker.
    sleep(Duration::from_millis(10)).await;

    let low = queue
        .add_task(BackgroundTask::new("record", named("low")).with_priority(TaskPriority::Low))
        .await
        .unwrap();
    let high = queue
        .add_task(BackgroundTask::new("record", named("high")).with_priority(TaskPriority::High))
        .await
        .unwrap();

    wait_all(&queue, &[blocker, low, high]).await;
    assert_eq!(*order.lock().unwrap(), vec!["blocker", "high", "low"]);
    queue.stop().await;
}

#[allow(clippy::unwrap_used)]
#[tokio::test(start_paused = true)]
async fn test_single_worker_runs_tasks_back_to_back() {
    let queue = TaskQueue::new(queue_config(1), Arc::new(Metrics::new())).unwrap();
    queue.register_handler("nap", |payload: Payload| async move {
        sleep(Duration::from_millis(100)).await;
        Ok::<_, BoxError>(payload)
    });
    queue.start().await;

    let started = Instant::now();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(queue.add_task(BackgroundTask::new("nap", Payload::new())).await.unwrap());
    }
    wait_all(&queue, &ids).await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(350), "{elapsed:?}");

    let stats = queue.get_stats().await;
    assert_eq!(stats.total_completed, 3);
    assert_eq!(stats.status_counts.get("completed"), Some(&3));
    queue.stop().await;
}

#[allow(clippy::unwrap_used)]
#[tokio::test(start_paused = true)]
async fn test_retry_backoff_grows_exponentially() {
    let queue = TaskQueue::new(queue_config(1), Arc::new(Metrics::new())).unwrap();
    queue.register_handler("flaky", |_: Payload| async move {
        Err::<Payload, BoxError>("upstream unavailable".into())
    });
    queue.start().await;

    let started = Instant::now();
    let id = queue
        .add_task(BackgroundTask::new("flaky", Payload::new()).with_max_retries(2))
        .await
        .unwrap();
    wait_all(&queue, std::slice::from_ref(&id)).await;

    // 2s before the first retry, 4s before the second.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(6100), "{elapsed:?}");

    let report = queue.get_task_status(&id).await;
    assert_eq!(report.status, Some(TaskStatus::Failed));
    assert_eq!(report.retry_count, 2);
    assert_eq!(report.error.as_deref(), Some("upstream unavailable"));
    queue.stop().await;
}

#[allow(clippy::unwrap_used)]
#[tokio::test(start_paused = true)]
async fn test_run_immediately_then_fixed_delay() {
    let queue = TaskQueue::new(queue_config(2), Arc::new(Metrics::new())).unwrap();
    let runs = Arc::new(Mutex::new(Vec::new()));
    let origin = Instant::now();

    let seen = Arc::clone(&runs);
    queue.register_handler("tick", move |payload: Payload| {
        seen.lock().unwrap().push(origin.elapsed());
        async move { Ok::<_, BoxError>(payload) }
    });
    queue.start().await;

    let scheduler = TaskScheduler::new(
        SchedulerConfig {
            poll_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(60),
        },
        queue.clone(),
    );
    let task = ScheduledTask::new("tick", "tick", Duration::from_secs(5))
        .unwrap()
        .run_immediately(true);
    assert!(scheduler.add_task(task).await);
    scheduler.start().await;

    sleep(Duration::from_millis(4900)).await;
    assert_eq!(runs.lock().unwrap().len(), 1);

    sleep(Duration::from_millis(300)).await;
    {
        let runs = runs.lock().unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0] < Duration::from_millis(100), "{:?}", runs[0]);
        assert!(runs[1] >= Duration::from_secs(5), "{:?}", runs[1]);
    }

    sleep(Duration::from_millis(4700)).await;
    assert_eq!(runs.lock().unwrap().len(), 2);

    let info = scheduler.get_task("tick").await.unwrap();
    assert_eq!(info.total_runs, 2);
    assert_eq!(info.failed_runs, 0);

    scheduler.stop().await;
    queue.stop().await;
}

#[allow(clippy::unwrap_used)]
#[tokio::test(start_paused = true)]
async fn test_stopped_queue_fails_health_check() {
    let manager = WorkerManager::new(
        queue_config(2),
        SchedulerConfig::default(),
        WorkerConfig::default(),
        Arc::new(Metrics::new()),
    )
    .await
    .unwrap();
    manager.start().await;
    assert!(manager.health_check().await.healthy);

    manager.queue().stop().await;

    let report = manager.health_check().await;
    assert!(!report.healthy);
    assert!(
        report.issues.iter().any(|issue| issue.contains("queue")),
        "{:?}",
        report.issues
    );
    manager.stop().await;
}

#[allow(clippy::unwrap_used)]
#[tokio::test(start_paused = true)]
async fn test_typed_job_through_manager() {
    let manager = WorkerManager::new(
        queue_config(2),
        SchedulerConfig::default(),
        WorkerConfig::default(),
        Arc::new(Metrics::new()),
    )
    .await
    .unwrap();
    manager.register_handler(FetchMatchHistoryJob::TASK_TYPE, |payload: Payload| async move {
        let job = FetchMatchHistoryJob::from_payload(payload)?;
        let mut result = Payload::new();
        result.insert("path".to_string(), job.path().into());
        Ok::<_, BoxError>(result)
    });
    manager.start().await;

    let payload = FetchMatchHistoryJob::new("p1", "euw1").into_payload().unwrap();
    let id = manager
        .run_immediate_task(FetchMatchHistoryJob::TASK_TYPE, payload)
        .await
        .unwrap();
    let report = manager
        .wait_for_task_completion(&id, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.status, Some(TaskStatus::Completed));
    assert_eq!(report.priority, Some(TaskPriority::High));
    assert_eq!(
        report.result.unwrap()["path"],
        "/match/v5/matches/by-player/euw1/p1/ids?count=20"
    );

    // Malformed payloads fail inside the handler.
    let id = manager
        .add_task(
            FetchMatchHistoryJob::TASK_TYPE,
            Payload::new(),
            TaskPriority::Normal,
            Some(0),
        )
        .await
        .unwrap();
    let report = manager
        .wait_for_task_completion(&id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(report.status, Some(TaskStatus::Failed));
    manager.stop().await;
}

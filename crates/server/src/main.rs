//! matchwatch worker entry point.

mod workers;

use std::sync::Arc;

use anyhow::Context;
use matchwatch_common::{Config, Metrics};
use matchwatch_queue::{AnalyzePlayersJob, FetchMatchHistoryJob, TaskJob, WorkerManager};
use matchwatch_ratelimit::{ApiClient, RateLimiter};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::workers::{AnalyzePlayersWorker, FetchMatchHistoryWorker, NoopScorer};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Windows, this only listens for Ctrl+C. If a handler cannot be
/// installed the error is logged and that signal is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matchwatch=info".into()),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting matchwatch...");

    let config = Config::load().context("failed to load configuration")?;
    let metrics = Arc::new(Metrics::new());

    let limiter = Arc::new(
        RateLimiter::from_settings(&config.rate_limit, Arc::clone(&metrics))
            .context("invalid rate limit configuration")?,
    );
    let client = ApiClient::new(&config.api, Arc::clone(&limiter))?;
    info!(base_url = %config.api.base_url, "API client ready");

    let manager = WorkerManager::from_config(&config, Arc::clone(&metrics))
        .await
        .context("failed to build worker manager")?;
    manager.register_handler(
        FetchMatchHistoryJob::TASK_TYPE,
        FetchMatchHistoryWorker::new(client),
    );
    manager.register_handler(
        AnalyzePlayersJob::TASK_TYPE,
        AnalyzePlayersWorker::new(Arc::new(NoopScorer)),
    );

    manager.run_until(shutdown_signal()).await;

    let stats = manager.get_system_stats().await;
    info!(
        completed = stats.queue.total_completed,
        failed = stats.queue.total_failed,
        scheduled_runs = stats.scheduler.total_runs,
        "matchwatch stopped"
    );
    info!("Final metrics:\n{}", metrics.to_prometheus());

    Ok(())
}

//! Scheduler loop driving due tasks through the runner.
//!
//! Each due task runs in its own tracked tokio task. Shutdown cancels the
//! token the runs check between states, then waits for every in-flight run
//! to finish so Finalizing cleanup and bookkeeping always complete before
//! the process exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::core::{schedule, RetryPolicy, TaskRunner};
use crate::db;

pub async fn run(
    db: Connection,
    runner: Arc<TaskRunner>,
    policy: RetryPolicy,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let tracker = TaskTracker::new();
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = poll.tick() => {}
            _ = shutdown.cancelled() => {
                info!("shutdown requested, cancelling active runs");
                break;
            }
        }

        let tasks = match db::tasks::list_unpaused(&db).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "failed to list tasks");
                continue;
            }
        };

        let now = chrono::Utc::now();
        for task in tasks.into_iter().filter(|t| schedule::is_due(t, now)) {
            info!(task_id = %task.id, "task due");
            let runner = runner.clone();
            let shutdown = shutdown.clone();
            tracker.spawn(async move {
                run_with_retry(&runner, &task.id, policy, &shutdown).await;
            });
        }
    }

    tracker.close();
    tracker.wait().await;
    info!("all runs finished");
    Ok(())
}

/// Drive one task through up to `policy.max_attempts` runs, backing off
/// between attempts. Stops early on success, on a non-retryable failure, or
/// when the daemon is shutting down.
async fn run_with_retry(
    runner: &TaskRunner,
    task_id: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) {
    let mut attempt = 1;
    loop {
        let report = match runner.run(task_id, cancel).await {
            Ok(report) => report,
            Err(e) => {
                error!(task_id, error = %e, "failed to record run");
                return;
            }
        };

        if report.error.is_none() || !report.retryable() || !policy.should_retry(attempt) {
            return;
        }

        let delay = policy.delay_for(attempt);
        warn!(task_id, attempt, delay_secs = delay.as_secs(), "retrying after failure");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return,
        }
        attempt += 1;
    }
}

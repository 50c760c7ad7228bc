//! Backup run state machine.
//!
//! A run walks Pending -> Validating -> Connecting -> Preparing ->
//! Transferring -> Finalizing and lands on Succeeded or Failed. Finalizing
//! always executes, whatever phase failed, so remote temp artifacts and
//! half-uploaded objects get cleaned up. Retrying is the scheduler's job;
//! one call to [`TaskRunner::run`] is exactly one attempt.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::checks::{apply_server_status, DestinationChecker};
use crate::core::events::EventSink;
use crate::core::keys::SshKeypair;
use crate::core::models::{BackupDestination, BackupTask, ConnectivityStatus, RemoteServer};
use crate::core::notifications::{Dispatcher, TaskOutcome};
use crate::core::ssh::{shell_quote, RemoteSession, RemoteShell};
use crate::core::storage::{StoreFactory, StorePayload};
use crate::core::strategy::{self, RemoteArtifact, StrategyContext};
use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Validating,
    Connecting,
    Preparing,
    Transferring,
    Finalizing,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Validating => "Validating",
            Self::Connecting => "Connecting",
            Self::Preparing => "Preparing",
            Self::Transferring => "Transferring",
            Self::Finalizing => "Finalizing",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    /// Lowercase form stored in `backup_tasks.last_status`.
    pub fn db_status(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            _ => "running",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    /// The task or server configuration cannot produce a backup. Never
    /// retried; the configuration will not fix itself.
    #[error("{0}")]
    Validation(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("transfer error: {0}")]
    Transfer(String),
    #[error("run cancelled")]
    Cancelled,
}

/// Shared append-only run log. Cloned into the strategy context so both
/// sides write lines while the session is borrowed.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self, line: impl Into<String>) {
        self.lines.lock().unwrap().push(line.into());
    }

    pub fn render(&self) -> String {
        self.lines.lock().unwrap().join("\n")
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub log_id: String,
    pub state: RunState,
    pub log: String,
    /// What failed, for callers deciding whether to retry. `None` on
    /// success.
    pub error: Option<RunError>,
}

impl RunReport {
    /// Connection, execution and transfer failures may clear up on a
    /// later attempt; validation failures and cancellations never do.
    pub fn retryable(&self) -> bool {
        matches!(
            self.error,
            Some(RunError::Connection(_) | RunError::Execution(_) | RunError::Transfer(_))
        )
    }
}

pub struct TaskRunner {
    db: Connection,
    shell: Arc<dyn RemoteShell>,
    stores: Arc<dyn StoreFactory>,
    events: Arc<dyn EventSink>,
    dispatcher: Arc<Dispatcher>,
    keypair: SshKeypair,
    connect_timeout: Duration,
}

impl TaskRunner {
    pub fn new(
        db: Connection,
        shell: Arc<dyn RemoteShell>,
        stores: Arc<dyn StoreFactory>,
        events: Arc<dyn EventSink>,
        dispatcher: Arc<Dispatcher>,
        keypair: SshKeypair,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            db,
            shell,
            stores,
            events,
            dispatcher,
            keypair,
            connect_timeout,
        }
    }

    /// Execute one attempt for the task. Persists the run log, updates the
    /// task's bookkeeping and the server's advisory status, and dispatches
    /// notifications before returning. Errors from the attempt itself land
    /// in the report; a returned `Err` means the engine could not record
    /// the run at all.
    pub async fn run(&self, task_id: &str, cancel: &CancellationToken) -> Result<RunReport> {
        let task = db::tasks::get(&self.db, task_id.to_string()).await?;
        let server = db::servers::get(&self.db, task.remote_server_id.clone()).await?;
        let destination = db::destinations::get(&self.db, task.destination_id.clone()).await?;

        let started_at = Utc::now();
        let log_id = db::task_logs::create(&self.db, task.id.clone(), started_at).await?;
        db::tasks::record_run_started(&self.db, task.id.clone(), started_at).await?;

        info!(task_id = %task.id, run_id = %log_id, "starting backup run");

        let mut attempt = Attempt {
            run_id: &log_id,
            task: &task,
            server: &server,
            destination: &destination,
            runner: self,
            cancel,
            log: RunLog::new(),
            session: None,
            artifact: None,
            uploaded_key: None,
            connected: false,
        };

        let result = attempt.execute().await;
        attempt.finalize(result.is_err()).await;

        let state = match &result {
            Ok(()) => RunState::Succeeded,
            Err(_) => RunState::Failed,
        };
        attempt.log.line(format!("state: {}", state.as_str()));
        if let Err(e) = &result {
            attempt.log.line(e.to_string());
            warn!(task_id = %task.id, run_id = %log_id, error = %e, "backup run failed");
        } else {
            info!(task_id = %task.id, run_id = %log_id, "backup run succeeded");
        }

        let connected = attempt.connected;
        let rendered = attempt.log.render();
        drop(attempt);

        let finished_at = Utc::now();
        let successful_at = result.is_ok().then_some(finished_at);
        db::task_logs::finalize(&self.db, log_id.clone(), rendered.clone(), successful_at).await?;
        db::tasks::record_run_finished(
            &self.db,
            task.id.clone(),
            state.db_status().to_string(),
            finished_at,
        )
        .await?;

        // A run doubles as a connectivity observation for the server.
        if connected {
            apply_server_status(
                &self.db,
                self.events.as_ref(),
                &server.id,
                server.connectivity_status,
                ConnectivityStatus::Online,
            )
            .await?;
        } else if matches!(&result, Err(RunError::Connection(_))) {
            apply_server_status(
                &self.db,
                self.events.as_ref(),
                &server.id,
                server.connectivity_status,
                ConnectivityStatus::Offline,
            )
            .await?;
        }

        let outcome = TaskOutcome::new(&task, &server, result.is_ok(), rendered.clone());
        self.dispatcher.dispatch(&outcome).await;

        Ok(RunReport {
            log_id,
            state,
            log: rendered,
            error: result.err(),
        })
    }
}

struct Attempt<'a> {
    run_id: &'a str,
    task: &'a BackupTask,
    server: &'a RemoteServer,
    destination: &'a BackupDestination,
    runner: &'a TaskRunner,
    cancel: &'a CancellationToken,
    log: RunLog,
    session: Option<Box<dyn RemoteSession>>,
    artifact: Option<RemoteArtifact>,
    uploaded_key: Option<String>,
    connected: bool,
}

impl Attempt<'_> {
    async fn execute(&mut self) -> Result<(), RunError> {
        let strategy = strategy::for_task(self.task);

        self.enter(RunState::Validating);
        self.checkpoint()?;
        strategy.validate(self.task, self.server)?;

        self.enter(RunState::Connecting);
        self.checkpoint()?;
        let target = self
            .runner
            .keypair
            .target_for(self.server, self.runner.connect_timeout);
        let session = self
            .runner
            .shell
            .connect(&target)
            .await
            .map_err(|e| RunError::Connection(e.to_string()))?;
        self.session = Some(session);
        self.connected = true;
        self.log
            .line(format!("connected to {}@{}", self.server.username, self.server.host));

        self.enter(RunState::Preparing);
        self.checkpoint()?;
        let Some(session) = self.session.as_deref() else {
            return Err(RunError::Execution("session not established".into()));
        };
        let ctx = StrategyContext {
            run_id: self.run_id,
            task: self.task,
            server: self.server,
            log: self.log.clone(),
        };
        let artifact = strategy.produce(session, &ctx).await?;
        self.artifact = Some(artifact);

        self.enter(RunState::Transferring);
        self.checkpoint()?;
        self.transfer().await?;

        Ok(())
    }

    async fn transfer(&mut self) -> Result<(), RunError> {
        let store = self
            .runner
            .stores
            .store_for(self.destination)
            .map_err(|e| RunError::Transfer(e.to_string()))?;

        // Gate on a fresh reachability check; it also refreshes the
        // destination's advisory status and emits the check event.
        let checker = DestinationChecker::new(
            self.runner.db.clone(),
            self.runner.stores.clone(),
            self.runner.events.clone(),
        );
        let reachable = checker
            .check(&self.destination.id)
            .await
            .map_err(|e| RunError::Transfer(e.to_string()))?;
        if !reachable {
            return Err(RunError::Transfer(format!(
                "destination {} is unreachable",
                self.destination.label
            )));
        }

        let Some(session) = self.session.as_deref() else {
            return Err(RunError::Execution("session not established".into()));
        };
        let Some(artifact) = self.artifact.clone() else {
            return Err(RunError::Execution("no artifact produced".into()));
        };

        // The artifact streams straight from the SSH channel into the PUT
        // body; it is never buffered whole. Streaming needs the measured
        // size up front, so an unmeasured artifact falls back to a buffered
        // read.
        let payload = match artifact.size_bytes {
            Some(size) => StorePayload::Stream {
                stream: session
                    .stream_file(&artifact.path)
                    .await
                    .map_err(|e| RunError::Transfer(e.to_string()))?,
                size,
            },
            None => StorePayload::Bytes(
                session
                    .read_file(&artifact.path)
                    .await
                    .map_err(|e| RunError::Transfer(e.to_string()))?,
            ),
        };

        let key = format!(
            "bktd/{}/{}/{}-{}.{}",
            self.task.owner,
            self.task.id,
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            self.run_id,
            artifact.extension
        );
        // Recorded before the upload starts so a failed PUT still gets its
        // partial object deleted during finalization.
        self.uploaded_key = Some(key.clone());

        let size = payload.size();
        store
            .put_object(&key, payload, artifact.content_type)
            .await
            .map_err(|e| RunError::Transfer(e.to_string()))?;

        self.log.line(format!("uploaded {size} bytes to {key}"));
        Ok(())
    }

    /// Runs on every path out of `execute`. Cleanup is best effort; a
    /// failed cleanup never changes the run's outcome.
    async fn finalize(&mut self, failed: bool) {
        self.enter(RunState::Finalizing);

        if failed {
            if let Some(key) = self.uploaded_key.take() {
                if let Ok(store) = self.runner.stores.store_for(self.destination) {
                    if let Err(e) = store.delete_object(&key).await {
                        warn!(run_id = %self.run_id, key = %key, error = %e, "failed to delete partial upload");
                    }
                }
            }
        }

        if let Some(mut session) = self.session.take() {
            if let Some(artifact) = &self.artifact {
                let command = format!("rm -f {}", shell_quote(&artifact.path));
                if let Err(e) = session.exec(&command).await {
                    warn!(run_id = %self.run_id, error = %e, "failed to remove remote artifact");
                }
            }
            if let Err(e) = session.close().await {
                warn!(run_id = %self.run_id, error = %e, "failed to close session");
            }
        }
    }

    fn enter(&mut self, state: RunState) {
        self.log.line(format!("state: {}", state.as_str()));
        info!(task_id = %self.task.id, run_id = %self.run_id, state = state.as_str(), "run state");
    }

    fn checkpoint(&self) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    }
}

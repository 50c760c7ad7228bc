mod email;
mod webhook;

pub use email::{EmailChannel, OutboundEmail};
pub use webhook::WebhookChannel;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_rusqlite::Connection;
use tracing::warn;

use crate::core::models::{BackupTask, RemoteServer, StreamKind};
use crate::db;

/// Subjects are part of the delivery contract; do not reword.
pub const SUBJECT_SUCCESS: &str = "Backup task completed";
pub const SUBJECT_FAILURE: &str = "Backup task failed";

/// The finished run, flattened for delivery.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub task_label: String,
    pub server_label: String,
    pub owner: String,
    pub succeeded: bool,
    pub log: String,
}

impl TaskOutcome {
    pub fn new(task: &BackupTask, server: &RemoteServer, succeeded: bool, log: String) -> Self {
        Self {
            task_id: task.id.clone(),
            task_label: task.label.clone(),
            server_label: server.label.clone(),
            owner: task.owner.clone(),
            succeeded,
            log,
        }
    }

    pub fn subject(&self) -> &'static str {
        if self.succeeded {
            SUBJECT_SUCCESS
        } else {
            SUBJECT_FAILURE
        }
    }
}

/// A delivery channel (email, chat webhook, etc.).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, outcome: &TaskOutcome) -> Result<()>;
}

/// Fans a finished run out to the owner's channels. Email always goes out;
/// webhook streams are looked up per owner. Delivery is fire-and-forget:
/// a channel error is logged and never fails the run that triggered it.
pub struct Dispatcher {
    db: Connection,
    mail: mpsc::UnboundedSender<OutboundEmail>,
    http: reqwest::Client,
}

impl Dispatcher {
    pub fn new(db: Connection, mail: mpsc::UnboundedSender<OutboundEmail>) -> Self {
        Self {
            db,
            mail,
            http: reqwest::Client::new(),
        }
    }

    pub async fn dispatch(&self, outcome: &TaskOutcome) {
        let mut channels: Vec<Box<dyn NotificationChannel>> = vec![Box::new(EmailChannel::new(
            outcome.owner.clone(),
            self.mail.clone(),
        ))];

        match db::streams::list_for_owner(&self.db, outcome.owner.clone()).await {
            Ok(streams) => {
                for stream in streams {
                    match stream.kind {
                        StreamKind::Webhook => channels.push(Box::new(WebhookChannel::new(
                            stream.target,
                            self.http.clone(),
                        ))),
                    }
                }
            }
            Err(e) => {
                warn!(task_id = %outcome.task_id, error = %e, "failed to load notification streams");
            }
        }

        for channel in channels {
            if let Err(e) = channel.notify(outcome).await {
                warn!(task_id = %outcome.task_id, error = %e, "notification delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{ConnectivityStatus, Frequency, TaskKind};

    fn outcome(succeeded: bool) -> TaskOutcome {
        let task = BackupTask {
            id: "task-1".into(),
            owner: "o@example.com".into(),
            label: "nightly".into(),
            remote_server_id: "srv-1".into(),
            destination_id: "dest-1".into(),
            kind: TaskKind::File,
            source_paths: vec!["/srv".into()],
            exclude_patterns: vec![],
            database_name: None,
            time_to_run: "02:30".into(),
            frequency: Frequency::Daily,
            paused: false,
            last_run_at: None,
            last_finished_at: None,
            last_status: None,
        };
        let server = RemoteServer {
            id: "srv-1".into(),
            owner: "o@example.com".into(),
            label: "web-1".into(),
            host: "192.0.2.1".into(),
            port: 22,
            username: "backup".into(),
            database_password: None,
            connectivity_status: ConnectivityStatus::Online,
        };
        TaskOutcome::new(&task, &server, succeeded, "state: Validating".into())
    }

    #[test]
    fn subject_tracks_outcome() {
        assert_eq!(outcome(true).subject(), "Backup task completed");
        assert_eq!(outcome(false).subject(), "Backup task failed");
    }

    #[tokio::test]
    async fn dispatch_always_sends_email() {
        let conn = crate::db::init_in_memory().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(conn, tx);

        dispatcher.dispatch(&outcome(false)).await;

        let email = rx.try_recv().unwrap();
        assert_eq!(email.to, "o@example.com");
        assert_eq!(email.subject, SUBJECT_FAILURE);
        assert!(email.body.contains("state: Validating"));
        assert!(rx.try_recv().is_err());
    }
}

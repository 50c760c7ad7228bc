use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{NotificationChannel, TaskOutcome};

/// A rendered message handed to the mail transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Queues outcome emails onto the daemon's outbound mail channel. The
/// transport behind the channel owns delivery; this side only renders.
pub struct EmailChannel {
    to: String,
    mail: mpsc::UnboundedSender<OutboundEmail>,
}

impl EmailChannel {
    pub fn new(to: String, mail: mpsc::UnboundedSender<OutboundEmail>) -> Self {
        Self { to, mail }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn notify(&self, outcome: &TaskOutcome) -> Result<()> {
        let body = format!(
            "Task: {}\nServer: {}\n\n{}\n",
            outcome.task_label, outcome.server_label, outcome.log
        );
        self.mail
            .send(OutboundEmail {
                to: self.to.clone(),
                subject: outcome.subject().to_string(),
                body,
            })
            .map_err(|_| anyhow!("mail channel closed"))
    }
}

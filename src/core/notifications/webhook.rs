use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::{NotificationChannel, TaskOutcome};

/// Posts outcomes to a chat webhook in Slack block format.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    fn format_message(&self, outcome: &TaskOutcome) -> serde_json::Value {
        // Ids are uuids today, but byte-slicing would panic on a multi-byte
        // boundary; fall back to the full id rather than guess one.
        let short_id = outcome.task_id.get(..8).unwrap_or(&outcome.task_id);
        let mut blocks = vec![
            json!({
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": outcome.subject(),
                    "emoji": true
                }
            }),
            json!({
                "type": "section",
                "fields": [
                    {
                        "type": "mrkdwn",
                        "text": format!("*Task:*\n{}", outcome.task_label)
                    },
                    {
                        "type": "mrkdwn",
                        "text": format!("*Task ID:*\n`{}`", short_id)
                    },
                    {
                        "type": "mrkdwn",
                        "text": format!("*Server:*\n{}", outcome.server_label)
                    }
                ]
            }),
        ];

        if !outcome.succeeded {
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*Log:*\n```{}```", outcome.log)
                }
            }));
        }

        json!({ "blocks": blocks })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn notify(&self, outcome: &TaskOutcome) -> Result<()> {
        let payload = self.format_message(outcome);
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

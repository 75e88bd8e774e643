//! Outbound chat messages.

use crate::config::ChatConf;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    Plain,
    Html,
    Markdown,
}

impl TextFormat {
    fn parse_mode(self) -> Option<&'static str> {
        match self {
            TextFormat::Plain => None,
            TextFormat::Html => Some("HTML"),
            TextFormat::Markdown => Some("Markdown"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("chat transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat API rejected message to {recipient}: {description}")]
    Rejected { recipient: i64, description: String },
}

/// Delivers a message to one chat
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, recipient: i64, text: &str, format: TextFormat) -> Result<(), SinkError>;
}

/// Send `text` to every recipient; failures are logged and skipped.
/// Returns how many deliveries succeeded.
pub async fn broadcast(
    sink: &dyn NotificationSink,
    recipients: &[i64],
    text: &str,
    format: TextFormat,
) -> usize {
    let mut delivered = 0;
    for &recipient in recipients {
        match sink.send(recipient, text, format).await {
            Ok(()) => delivered += 1,
            Err(e) => error!("Failed to deliver message to {}: {}", recipient, e),
        }
    }
    delivered
}

/// Telegram Bot API `sendMessage`
pub struct TelegramSink {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct BotApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramSink {
    pub fn new(conf: &ChatConf) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                conf.api_base.trim_end_matches('/'),
                conf.bot_token
            ),
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, recipient: i64, text: &str, format: TextFormat) -> Result<(), SinkError> {
        let mut body = json!({ "chat_id": recipient, "text": text });
        if let Some(mode) = format.parse_mode() {
            body["parse_mode"] = json!(mode);
        }
        // the endpoint embeds the token, so reqwest errors are stripped of the URL
        let reply: BotApiReply = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.without_url()))?
            .json()
            .await
            .map_err(|e| SinkError::Transport(e.without_url()))?;

        if reply.ok {
            debug!("Delivered message to {}", recipient);
            Ok(())
        } else {
            Err(SinkError::Rejected {
                recipient,
                description: reply.description.unwrap_or_else(|| "unknown error".into()),
            })
        }
    }
}

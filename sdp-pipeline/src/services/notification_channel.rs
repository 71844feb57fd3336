//! Notification delivery channels
//!
//! Sender and recipient are fixed by configuration. A channel returns a
//! delivery identifier on success; failures are classified so the
//! notification stage retries only what can succeed later.

use async_trait::async_trait;
use sdp_common::config::NotificationConfig;
use sdp_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Rendered notification ready for dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver one message, returning its delivery id
    async fn dispatch(&self, message: &RenderedMessage) -> Result<String>;
}

/// HTTP webhook channel
///
/// POSTs `{from, to, subject, html, text}` as JSON. The delivery id is the
/// `messageId` field of the reply when present.
pub struct WebhookChannel {
    http_client: reqwest::Client,
    url: String,
    from_address: String,
    to_address: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, config: &NotificationConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("webhook client: {}", e)))?;

        Ok(Self {
            http_client,
            url: url.into(),
            from_address: config.from_address.clone(),
            to_address: config.to_address.clone(),
        })
    }
}

/// 429 and 5xx can clear up; any other rejection cannot
fn classify_status(status: reqwest::StatusCode, body: &str) -> Error {
    let detail = format!("webhook returned {}: {}", status.as_u16(), body);
    if status.as_u16() == 429 || status.is_server_error() {
        Error::Transient(detail)
    } else {
        Error::Permanent(detail)
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn dispatch(&self, message: &RenderedMessage) -> Result<String> {
        if self.from_address.trim().is_empty() || self.to_address.trim().is_empty() {
            return Err(Error::Permanent("sender and recipient must be configured".into()));
        }

        let payload = json!({
            "from": self.from_address,
            "to": self.to_address,
            "subject": message.subject,
            "html": message.html_body,
            "text": message.text_body,
        });

        let response = self
            .http_client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transient(format!("webhook reply unreadable: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let delivery_id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("messageId").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(delivery_id)
    }
}

/// Writes each message as an `.html` file into a directory
pub struct OutboxChannel {
    dir: PathBuf,
    from_address: String,
    to_address: String,
}

impl OutboxChannel {
    pub fn new(dir: impl Into<PathBuf>, config: &NotificationConfig) -> Self {
        Self {
            dir: dir.into(),
            from_address: config.from_address.clone(),
            to_address: config.to_address.clone(),
        }
    }
}

#[async_trait]
impl NotificationChannel for OutboxChannel {
    async fn dispatch(&self, message: &RenderedMessage) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let file_name = format!(
            "{}_{}.html",
            sdp_common::time::key_timestamp(sdp_common::time::now()),
            Uuid::new_v4().simple()
        );
        let header = format!(
            "<!--\nFrom: {}\nTo: {}\nSubject: {}\n-->\n",
            self.from_address,
            self.to_address,
            message.subject.replace("--", "- -")
        );
        tokio::fs::write(self.dir.join(&file_name), format!("{}{}", header, message.html_body)).await?;

        Ok(file_name)
    }
}

/// Channel that records messages in memory
///
/// Queued errors are returned first, one per dispatch.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<RenderedMessage>>,
    failures: Mutex<VecDeque<Error>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, errors: impl IntoIterator<Item = Error>) {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).extend(errors);
    }

    pub fn sent(&self) -> Vec<RenderedMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn dispatch(&self, message: &RenderedMessage) -> Result<String> {
        if let Some(err) = self.failures.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            return Err(err);
        }
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push(message.clone());
        Ok(format!("recorded-{}", sent.len()))
    }
}

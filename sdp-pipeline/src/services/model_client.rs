//! Generative model client
//!
//! Sends one prompt, returns the reply text. Transport problems (connect
//! failures, timeouts, 5xx, 429) are transient so the analysis stage can
//! retry them; a reply whose content is not what we expect is handed back
//! verbatim and left to the response parser.

use async_trait::async_trait;
use sdp_common::config::ModelConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = "sdp-pipeline/0.1.0";

/// Model client errors
#[derive(Debug, Error)]
pub enum ModelClientError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),
}

impl From<ModelClientError> for sdp_common::Error {
    fn from(err: ModelClientError) -> Self {
        let transient = match &err {
            ModelClientError::NetworkError(_) | ModelClientError::Timeout(_) => true,
            ModelClientError::ApiError(status, _) => *status == 429 || *status >= 500,
        };
        if transient {
            sdp_common::Error::Transient(err.to_string())
        } else {
            sdp_common::Error::Permanent(err.to_string())
        }
    }
}

/// System instruction plus user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// One invocation; no retries here
    async fn invoke(&self, prompt: &Prompt) -> sdp_common::Result<String>;
}

/// HTTP client for a model invocation endpoint
pub struct HttpModelClient {
    http_client: reqwest::Client,
    config: ModelConfig,
}

impl HttpModelClient {
    pub fn new(config: ModelConfig) -> Result<Self, ModelClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelClientError::NetworkError(e.to_string()))?;

        Ok(Self { http_client, config })
    }

    /// Request body: system block, one user message, inference settings
    pub fn request_body(&self, prompt: &Prompt) -> Value {
        json!({
            "modelId": self.config.model_id,
            "system": [{ "text": prompt.system }],
            "messages": [{
                "role": "user",
                "content": [{ "text": prompt.user }],
            }],
            "inferenceConfig": {
                "maxTokens": self.config.max_tokens,
                "temperature": self.config.temperature,
                "topP": self.config.top_p,
            },
        })
    }

    async fn send(&self, prompt: &Prompt) -> Result<String, ModelClientError> {
        let mut request = self
            .http_client
            .post(&self.config.endpoint)
            .json(&self.request_body(prompt));
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelClientError::Timeout(Duration::from_secs(self.config.timeout_secs))
            } else {
                ModelClientError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ModelClientError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(ModelClientError::ApiError(status.as_u16(), body));
        }

        Ok(body)
    }
}

/// Joined `output.message.content[].text`, or the raw body when the reply
/// has no text parts
pub fn extract_reply_text(body: &str) -> String {
    let parts: Vec<String> = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/output/message/content").and_then(Value::as_array).cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|c| c.get("text").and_then(Value::as_str).map(str::to_string))
        .collect();

    if parts.is_empty() {
        tracing::warn!(body_len = body.len(), "Model reply has no text content");
        body.to_string()
    } else {
        parts.join("\n")
    }
}

#[async_trait]
impl GenerativeModel for HttpModelClient {
    async fn invoke(&self, prompt: &Prompt) -> sdp_common::Result<String> {
        let limit = Duration::from_secs(self.config.timeout_secs);

        tracing::debug!(
            model = %self.config.model_id,
            prompt_chars = prompt.user.len(),
            "Invoking generative model"
        );

        let body = match tokio::time::timeout(limit, self.send(prompt)).await {
            Ok(result) => result?,
            Err(_) => return Err(ModelClientError::Timeout(limit).into()),
        };

        Ok(extract_reply_text(&body))
    }
}

/// Model that replays queued replies and counts invocations
///
/// When the queue is empty every call fails transiently.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<sdp_common::Result<String>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        let model = Self::new();
        model.push_reply(reply);
        model
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, err: sdp_common::Error) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn invoke(&self, _prompt: &Prompt) -> sdp_common::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(sdp_common::Error::Transient("model unavailable".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let client = HttpModelClient::new(ModelConfig::default()).unwrap();
        let body = client.request_body(&Prompt {
            system: "sys".into(),
            user: "analyze".into(),
        });

        assert_eq!(body["system"][0]["text"], "sys");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "analyze");
        assert_eq!(body["inferenceConfig"]["maxTokens"], 1000);
    }

    #[test]
    fn test_extract_joins_text_parts() {
        let body = r#"{"output":{"message":{"content":[{"text":"a"},{"image":{}},{"text":"b"}]}}}"#;
        assert_eq!(extract_reply_text(body), "a\nb");
    }

    #[test]
    fn test_extract_falls_back_to_raw_body() {
        assert_eq!(extract_reply_text("not json"), "not json");
        assert_eq!(extract_reply_text(r#"{"output":{}}"#), r#"{"output":{}}"#);
    }

    #[test]
    fn test_error_classification() {
        let e: sdp_common::Error = ModelClientError::ApiError(503, "busy".into()).into();
        assert!(e.is_transient());
        let e: sdp_common::Error = ModelClientError::ApiError(429, "slow down".into()).into();
        assert!(e.is_transient());
        let e: sdp_common::Error = ModelClientError::ApiError(400, "bad".into()).into();
        assert!(!e.is_transient());
        let e: sdp_common::Error = ModelClientError::Timeout(Duration::from_secs(1)).into();
        assert!(e.is_transient());
    }

    #[tokio::test]
    async fn test_scripted_model_counts_calls() {
        let model = ScriptedModel::with_reply("{}");
        let prompt = Prompt {
            system: String::new(),
            user: String::new(),
        };
        assert_eq!(model.invoke(&prompt).await.unwrap(), "{}");
        assert!(model.invoke(&prompt).await.unwrap_err().is_transient());
        assert_eq!(model.calls(), 2);
    }
}

//! Chat-completions client.
//!
//! [`OpenAiChatClient`] speaks the OpenAI-style `/chat/completions` wire
//! format over HTTP.  Transport failures and rate limits are retried with
//! capped exponential backoff; malformed response bodies are a typed error
//! that fails the current round (the loop maps it to an apology).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::{ChatReply, ChatRequest, ToolCallRequest};

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// A chat backend: ordered message log + optional tool catalog in, one
/// assistant message out.  Implementations must surface the model's raw
/// tool-call ids unchanged.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Produce the next assistant message.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the HTTP chat client.
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    /// API key sent as a bearer credential.
    pub api_key: String,
    /// API base URL (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Total attempts per call (1 initial + retries).
    pub max_attempts: u32,
    /// Sampling temperature.
    pub temperature: Option<f32>,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            model: String::new(),
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            temperature: Some(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP chat-completions client.
pub struct OpenAiChatClient {
    config: ChatClientConfig,
    http: reqwest::Client,
}

impl OpenAiChatClient {
    /// Create a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingApiKey`] when no key is configured.
    pub fn new(config: ChatClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingApiKey);
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    /// Send one request, without retry handling.
    async fn send_once(&self, request: &ChatRequest) -> Result<Value> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AgentError::LlmRequestFailed {
                reason: format!("api returned {status}: {body}"),
            });
        }

        serde_json::from_str(&body).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("response body is not json: {e}"),
        })
    }

    /// Whether a failed attempt is worth retrying (transport errors, rate
    /// limits, upstream 5xx).  Parse failures are not.
    fn retryable(error: &AgentError) -> bool {
        match error {
            AgentError::LlmRequestFailed { reason } => {
                reason.contains("429")
                    || reason.contains("500")
                    || reason.contains("502")
                    || reason.contains("503")
                    || !reason.contains("api returned")
            }
            _ => false,
        }
    }
}

/// Parse `choices[0].message` into a [`ChatReply`].
pub(crate) fn parse_reply(body: &Value) -> Result<ChatReply> {
    let message = body["choices"]
        .get(0)
        .map(|c| &c["message"])
        .ok_or_else(|| AgentError::LlmParseFailed {
            reason: "response has no choices".into(),
        })?;

    if !message.is_object() {
        return Err(AgentError::LlmParseFailed {
            reason: "choices[0].message is not an object".into(),
        });
    }

    let content = message["content"].as_str().map(str::to_owned);
    let tool_calls: Vec<ToolCallRequest> = match &message["tool_calls"] {
        Value::Null => Vec::new(),
        calls => serde_json::from_value(calls.clone()).map_err(|e| {
            AgentError::LlmParseFailed {
                reason: format!("invalid tool_calls payload: {e}"),
            }
        })?,
    };

    Ok(ChatReply {
        content,
        tool_calls,
    })
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply> {
        let mut delay = Duration::from_millis(500);
        let mut last_error = None;

        for attempt in 1..=self.config.max_attempts {
            match self.send_once(request).await {
                Ok(body) => return parse_reply(&body),
                Err(e) if Self::retryable(&e) && attempt < self.config.max_attempts => {
                    tracing::warn!(attempt, error = %e, "llm call failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(AgentError::LlmRequestFailed {
            reason: "exhausted retries".into(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

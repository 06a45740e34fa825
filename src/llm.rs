//! Rate-limited client for the external language model.
//!
//! [`LlmClient`] wraps an [`LlmTransport`] with two policies:
//!
//! - **Pacing**: consecutive requests start at least `llm.min_delay_ms`
//!   apart. The pacing lock is held while waiting, so concurrent callers queue.
//! - **Retry**: HTTP 429, 5xx, and network errors are retried up to
//!   `llm.max_retries` times with exponential backoff
//!   (`backoff_base_ms`, doubled per attempt: 2s, 4s, 8s by default).
//!   Other 4xx responses fail immediately.
//!
//! Exhausted retries surface as [`LlmError::Unavailable`]; callers turn that
//! into a "temporarily unavailable" answer rather than an error page.
//!
//! The production transport is [`GeminiTransport`], which calls the Gemini
//! `generateContent` endpoint.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::LlmConfig;

/// Failure reported by a transport for a single request.
#[derive(Debug, Clone)]
pub struct TransportError {
    /// HTTP status, or `None` for network-level failures.
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(429) => true,
            Some(s) => s >= 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model is disabled; set [llm] provider in config")]
    Disabled,
    #[error("language model temporarily unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
    #[error("language model rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("language model returned no answer text")]
    EmptyAnswer,
}

/// A single request/response exchange with a model provider.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, prompt: &str) -> Result<String, TransportError>;
}

/// Used when `llm.provider = "disabled"`.
pub struct DisabledTransport;

#[async_trait]
impl LlmTransport for DisabledTransport {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn send(&self, _prompt: &str) -> Result<String, TransportError> {
        Err(TransportError {
            status: None,
            message: "disabled".to_string(),
        })
    }
}

/// Gemini `generateContent` over HTTPS.
pub struct GeminiTransport {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiTransport {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for Gemini provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }
}

#[async_trait]
impl LlmTransport for GeminiTransport {
    fn name(&self) -> &str {
        &self.model
    }

    async fn send(&self, prompt: &str) -> Result<String, TransportError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError {
                status: Some(status.as_u16()),
                message: text,
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| TransportError {
            status: None,
            message: format!("invalid response body: {}", e),
        })?;
        // A blocked or empty candidate list is an answer with no text.
        Ok(parse_gemini_response(&json).unwrap_or_default())
    }
}

/// Concatenates `candidates[0].content.parts[*].text`.
pub fn parse_gemini_response(json: &serde_json::Value) -> Option<String> {
    let parts = json
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: Vec<&str> = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join(""))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << (attempt.saturating_sub(1)).min(10))
    }
}

pub struct LlmClient {
    transport: Arc<dyn LlmTransport>,
    policy: RetryPolicy,
    last_call: Mutex<Option<Instant>>,
}

impl LlmClient {
    pub fn new(transport: Arc<dyn LlmTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            last_call: Mutex::new(None),
        }
    }

    /// Builds the client named by `llm.provider`.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let transport: Arc<dyn LlmTransport> = match config.provider.as_str() {
            "disabled" => Arc::new(DisabledTransport),
            "gemini" => Arc::new(GeminiTransport::new(config)?),
            other => anyhow::bail!("Unknown llm provider: {}", other),
        };
        Ok(Self::new(transport, RetryPolicy::from_config(config)))
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_enabled()
    }

    pub fn model_name(&self) -> &str {
        self.transport.name()
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if !self.transport.is_enabled() {
            return Err(LlmError::Disabled);
        }

        let mut last_error = String::new();
        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "retrying language model call"
                );
                tokio::time::sleep(delay).await;
            }

            self.pace().await;
            match self.transport.send(prompt).await {
                Ok(text) if text.trim().is_empty() => return Err(LlmError::EmptyAnswer),
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "language model answered");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() => {
                    last_error = match e.status {
                        Some(s) => format!("HTTP {}: {}", s, e.message),
                        None => e.message,
                    };
                }
                Err(e) => {
                    return Err(LlmError::Rejected {
                        status: e.status.unwrap_or(0),
                        body: e.message,
                    });
                }
            }
        }

        Err(LlmError::Unavailable {
            attempts: self.policy.max_retries + 1,
            last_error,
        })
    }

    /// Waits until `min_delay` has passed since the previous request started.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.policy.min_delay {
                tokio::time::sleep(self.policy.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

//! The generation service boundary.
//!
//! Everything above this module sees a single capability: turn a prompt
//! into text, with failures split into transient (retriable) and permanent
//! (not). `MessagesClient` is the production implementation speaking an
//! Anthropic-messages-style HTTP API; tests substitute deterministic stubs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReliftError, Result};

/// A single `generate(prompt) -> text` capability.
///
/// Implementations must surface a distinguishable transient-vs-permanent
/// signal via the error's `retry_category()`; the resilient client retries
/// only transient failures.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// HTTP client for a messages-style completion endpoint.
#[derive(Debug, Clone)]
pub struct MessagesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl MessagesClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: 8192,
        }
    }

    /// Point the client at a different endpoint (test servers, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl GenerationService for MessagesClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| ReliftError::PermanentService(format!("request failed: {e}")))?;

        let status = response.status();
        debug!(status = status.as_u16(), "generation response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Throttling, overload, and internal errors are the service's
            // transient signals; everything else is a request defect.
            return match status.as_u16() {
                429 | 500 | 503 | 529 => Err(ReliftError::TransientService(format!(
                    "status {status}: {body}"
                ))),
                _ => Err(ReliftError::PermanentService(format!(
                    "status {status}: {body}"
                ))),
            };
        }

        let decoded: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ReliftError::PermanentService(format!("error decoding response: {e}")))?;

        if decoded.content.is_empty() {
            return Err(ReliftError::PermanentService(
                "response contains no content blocks".into(),
            ));
        }

        Ok(decoded
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .concat())
    }
}

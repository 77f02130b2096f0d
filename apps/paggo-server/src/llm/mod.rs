//! LLM Module
//!
//! Question answering over a document's OCR text. Two HTTP backends are
//! available, OpenAI (Responses API) and Gemini (`generateContent`); both
//! retry transient failures with bounded exponential backoff.

mod gemini;
mod openai;
mod retry;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use retry::{with_retry, RetryPolicy};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::{LlmConfig, LlmProvider};

/// Per-request HTTP timeout for LLM calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    User,
    Assistant,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One conversation turn sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("LLM backend not configured: {0}")]
    NotConfigured(String),

    /// Network failures, rate limits and 5xx responses
    #[error("LLM request failed: {0}")]
    Transient(String),

    #[error("LLM request rejected: {0}")]
    Permanent(String),

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a non-success HTTP status
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("{}: {}", status, body.trim());
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transient(e.to_string())
        }
    }
}

/// Answers a conversation given system-level instructions
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn answer_with_context(
        &self,
        instructions: &str,
        messages: &[LlmMessage],
    ) -> Result<String, LlmError>;
}

/// Build the configured backend.
///
/// A missing API key is not an error here; calls fail with
/// [`LlmError::NotConfigured`] instead so the server can still start.
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    let http = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| LlmError::NotConfigured(format!("HTTP client: {}", e)))?;

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiClient::new(http, config)),
        LlmProvider::Gemini => Arc::new(GeminiClient::new(http, config)),
    };

    tracing::info!(
        provider = ?config.provider,
        model = %config.model,
        configured = config.api_key.is_some(),
        "LLM backend ready"
    );

    Ok(client)
}

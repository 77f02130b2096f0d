//! Gemini `generateContent` backend
//!
//! Instructions and history are flattened into a single transcript prompt.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{with_retry, LlmClient, LlmError, LlmMessage, RetryPolicy};
use crate::config::LlmConfig;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    /// Text of the first candidate; empty when the model returned none
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

/// `ROLE:\ncontent` blocks separated by `---` rules
pub(crate) fn transcript(messages: &[LlmMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}:\n{}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn prompt(instructions: &str, messages: &[LlmMessage]) -> String {
    format!(
        "INSTRUCTIONS:\n{}\n\nCONVERSATION:\n{}\n",
        instructions,
        transcript(messages)
    )
}

pub struct GeminiClient {
    http: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(http: Client, config: &LlmConfig) -> Self {
        Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            retry: config.retry.clone(),
        }
    }

    async fn send(&self, api_key: &str, body: &GenerateRequest) -> Result<String, LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &body));
        }

        let parsed: GenerateResponse = response.json().await.map_err(LlmError::from_reqwest)?;
        Ok(parsed.text())
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn answer_with_context(
        &self,
        instructions: &str,
        messages: &[LlmMessage],
    ) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::NotConfigured("GEMINI_API_KEY is not set".to_string()))?;

        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt(instructions, messages),
                }],
            }],
        };

        with_retry(&self.retry, "Gemini request", || self.send(api_key, &body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_format() {
        let text = transcript(&[LlmMessage::user("hello"), LlmMessage::assistant("hi")]);
        assert_eq!(text, "USER:\nhello\n\n---\n\nASSISTANT:\nhi");

        let full = prompt("be brief", &[LlmMessage::user("q")]);
        assert!(full.starts_with("INSTRUCTIONS:\nbe brief\n\nCONVERSATION:\nUSER:\nq"));
    }

    #[test]
    fn test_response_text() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "Due "}, {"text": "2024-05-01"}]}},
                {"content": {"role": "model", "parts": [{"text": "ignored"}]}}
            ]
        }))
        .unwrap();
        assert_eq!(response.text(), "Due 2024-05-01");

        let empty: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty.text(), "");
    }
}

//! OpenAI Responses API backend

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{with_retry, LlmClient, LlmError, LlmMessage, RetryPolicy};
use crate::config::LlmConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a [LlmMessage],
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponsesResponse {
    /// Concatenated `output_text` parts, as the SDK's `output_text` helper does
    fn output_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|c| c.kind == "output_text")
            .map(|c| c.text.as_str())
            .collect()
    }
}

pub struct OpenAiClient {
    http: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_output_tokens: u32,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(http: Client, config: &LlmConfig) -> Self {
        Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_output_tokens: config.max_output_tokens,
            retry: config.retry.clone(),
        }
    }

    async fn send(&self, api_key: &str, body: &ResponsesRequest<'_>) -> Result<String, LlmError> {
        let url = format!("{}/v1/responses", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &body));
        }

        let parsed: ResponsesResponse = response.json().await.map_err(LlmError::from_reqwest)?;
        Ok(parsed.output_text())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn answer_with_context(
        &self,
        instructions: &str,
        messages: &[LlmMessage],
    ) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::NotConfigured("OPENAI_API_KEY is not set".to_string()))?;

        let body = ResponsesRequest {
            model: &self.model,
            instructions,
            input: messages,
            max_output_tokens: self.max_output_tokens,
        };

        with_retry(&self.retry, "OpenAI request", || self.send(api_key, &body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_output_text_joins_text_parts() {
        let response: ResponsesResponse = serde_json::from_value(serde_json::json!({
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Total: "},
                    {"type": "refusal", "refusal": "no"},
                    {"type": "output_text", "text": "R$ 10,00"}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(response.output_text(), "Total: R$ 10,00");
    }

    /// Fails once with 503, then answers
    async fn flaky_endpoint(
        State(calls): State<Arc<AtomicUsize>>,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["input"][0]["role"], "user");

        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})));
        }
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "output": [{"type": "message", "content": [{"type": "output_text", "text": "42"}]}]
            })),
        )
    }

    #[tokio::test]
    async fn test_answer_retries_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/v1/responses", post(flaky_endpoint))
            .with_state(calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = LlmConfig {
            provider: crate::config::LlmProvider::OpenAi,
            api_key: Some("sk-test".to_string()),
            model: "gpt-4o-mini".to_string(),
            base_url: Some(format!("http://{}", addr)),
            max_output_tokens: 400,
            retry: RetryPolicy {
                retries: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
        };
        let client = OpenAiClient::new(Client::new(), &config);

        let answer = client
            .answer_with_context("be brief", &[LlmMessage::user("what is the total?")])
            .await
            .unwrap();

        assert_eq!(answer, "42");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let config = LlmConfig {
            provider: crate::config::LlmProvider::OpenAi,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            max_output_tokens: 400,
            retry: RetryPolicy::default(),
        };
        let client = OpenAiClient::new(Client::new(), &config);

        let result = client.answer_with_context("x", &[]).await;
        assert!(matches!(result, Err(LlmError::NotConfigured(_))));
    }
}

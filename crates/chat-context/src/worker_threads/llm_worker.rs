//! OpenAI-compatible chat completions client.
//!
//! One HTTP client is shared by the response generator and the summarizer;
//! each caller picks its own model and sampling settings.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::context_engine::TextGenerator;
use crate::error::GenerationError;

/// Message as sent on the wire. `content` is a string or a list of content parts.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: Value,
}

impl WireMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: Value::String(content.into()) }
    }

    pub fn parts(role: &str, parts: Vec<Value>) -> Self {
        Self { role: role.to_string(), content: Value::Array(parts) }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmClient {
    base_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("LLM client initialized with backend: {}", base_url);
        Self {
            base_url,
            api_key,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    pub async fn complete(
        &self,
        model: &str,
        messages: &[WireMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        debug!(model, messages = messages.len(), "Requesting chat completion");
        let request = ChatCompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
            stream: false,
        };

        let mut builder = self.http_client.post(self.completions_url()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(GenerationError::EmptyCompletion)
    }
}

/// Plain system + user completion with fixed settings.
pub struct TextCompletion {
    client: Arc<LlmClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl TextCompletion {
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self { client, model: model.into(), temperature, max_tokens }
    }

    /// Settings used for conversation summaries.
    pub fn for_summaries(client: Arc<LlmClient>, model: impl Into<String>) -> Self {
        Self::new(client, model, 0.3, 300)
    }
}

#[async_trait]
impl TextGenerator for TextCompletion {
    async fn generate_text(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GenerationError> {
        let messages = [
            WireMessage::text("system", system_prompt),
            WireMessage::text("user", user_prompt),
        ];
        self.client
            .complete(&self.model, &messages, self.temperature, self.max_tokens)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn completion_body(content: &str) -> String {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
    }

    #[tokio::test]
    async fn test_complete_sends_model_and_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({"model": "gpt-4o-mini", "max_tokens": 300, "stream": false})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("A short summary."))
            .create_async()
            .await;

        let client = Arc::new(LlmClient::new(server.url(), Some("test-key".to_string()), Duration::from_secs(5)));
        let summaries = TextCompletion::for_summaries(client, "gpt-4o-mini");
        let text = summaries.generate_text("system", "user").await.unwrap();

        assert_eq!(text, "A short summary.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let client = LlmClient::new(server.url(), None, Duration::from_secs(5));
        let err = client
            .complete("gpt-4o", &[WireMessage::text("user", "hi")], 0.7, 100)
            .await
            .unwrap_err();
        match err {
            GenerationError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_and_bad_json() {
        let mut server = mockito::Server::new_async().await;
        let _empty = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "empty"})))
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;
        let _broken = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "broken"})))
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = LlmClient::new(server.url(), None, Duration::from_secs(5));
        let msgs = [WireMessage::text("user", "hi")];
        assert!(matches!(
            client.complete("empty", &msgs, 0.7, 10).await,
            Err(GenerationError::EmptyCompletion)
        ));
        assert!(matches!(
            client.complete("broken", &msgs, 0.7, 10).await,
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let client = LlmClient::new("http://127.0.0.1:9", None, Duration::from_secs(2));
        let err = client
            .complete("gpt-4o", &[WireMessage::text("user", "hi")], 0.7, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));
    }
}

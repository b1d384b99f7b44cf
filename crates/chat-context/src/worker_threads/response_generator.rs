//! LLM-backed response generator producing chat, recommendation or hybrid replies.

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::context_engine::context_filter::dedupe_summary_entries;
use crate::error::GenerationError;
use crate::turn::{GenerationRequest, GeneratorReply, ResponseGenerator};
use crate::worker_threads::llm_worker::{LlmClient, WireMessage};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly food and nutrition assistant. \
Answer conversationally and keep replies short unless the user asks for detail.\n\
Always reply with a single JSON object in one of these shapes:\n\
{\"type\": \"chat\", \"content\": \"...\"}\n\
{\"type\": \"recommendation\", \"title\": \"...\", \"content\": \"...\", \"health\": [{\"label\": \"...\", \"description\": \"...\"}]}\n\
{\"type\": \"hybrid\", \"chat\": \"...\", \"recommendation\": {\"title\": \"...\", \"content\": \"...\", \"health\": []}}\n\
Use a recommendation only when suggesting a specific meal or dish.";

pub struct LlmResponseGenerator {
    client: Arc<LlmClient>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmResponseGenerator {
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_system_prompt_file(self, path: &Path) -> anyhow::Result<Self> {
        let prompt = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read system prompt {}: {}", path.display(), e))?;
        Ok(self.with_system_prompt(prompt))
    }

    pub(crate) fn build_messages(&self, request: &GenerationRequest) -> Vec<WireMessage> {
        let mut messages = vec![WireMessage::text("system", self.system_prompt.as_str())];
        if let Some(style) = request.style.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(WireMessage::text("system", format!("Preferred response style: {}", style.trim())));
        }

        for message in dedupe_summary_entries(request.history.clone()) {
            messages.push(WireMessage::text(message.role.as_str(), message.content));
        }

        let mut text = String::new();
        if let Some(time_of_day) = request.time_of_day {
            text.push_str(&format!("Time of day: {}\n", time_of_day));
        }
        if let Some(name) = request.user_name.as_deref() {
            text.push_str(&format!("User name: {}\n", name));
        }
        text.push_str(&request.user_input);

        if request.images.is_empty() {
            messages.push(WireMessage::text("user", text));
        } else {
            let mut parts = vec![json!({"type": "text", "text": text})];
            parts.extend(
                request
                    .images
                    .iter()
                    .map(|image| json!({"type": "image_url", "image_url": {"url": image.url}})),
            );
            messages.push(WireMessage::parts("user", parts));
        }
        messages
    }
}

#[async_trait]
impl ResponseGenerator for LlmResponseGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratorReply, GenerationError> {
        let messages = self.build_messages(&request);
        let raw = self
            .client
            .complete(&self.model, &messages, self.temperature, self.max_tokens)
            .await?;
        let reply = GeneratorReply::parse(&raw);
        debug!(kind = reply.kind(), "Generator reply parsed");
        Ok(reply)
    }
}

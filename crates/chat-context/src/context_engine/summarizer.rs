//! Rolling-summary generation through an LLM.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GenerationError, SummarizationError};
use crate::memory::ChatMessage;

pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that creates concise conversation summaries.";

/// Plain text completion: one system prompt, one user prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GenerationError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Folds `older` into `existing` and returns the replacement summary.
    async fn summarize(
        &self,
        older: &[ChatMessage],
        existing: Option<&str>,
    ) -> Result<String, SummarizationError>;
}

/// Domain knobs for the summary prompt.
#[derive(Debug, Clone)]
pub struct SummaryProfile {
    pub domain: String,
    pub focus: Vec<String>,
    pub fresh_word_limit: usize,
    pub extend_word_limit: usize,
}

impl Default for SummaryProfile {
    fn default() -> Self {
        Self {
            domain: "food recommendations and dietary preferences".to_string(),
            focus: vec![
                "key user preferences, dietary needs, budgets and constraints".to_string(),
                "decisions already made, including what the user already picked today (breakfast, lunch, dinner, snacks)".to_string(),
                "information useful for future recommendations".to_string(),
            ],
            fresh_word_limit: 150,
            extend_word_limit: 200,
        }
    }
}

impl SummaryProfile {
    pub fn with_domain(domain: impl Into<String>) -> Self {
        Self { domain: domain.into(), ..Self::default() }
    }

    /// Deterministic stand-in used when the summarizer fails.
    pub fn fallback_summary(&self, message_count: usize) -> String {
        format!("Conversation covering {} messages about {}.", message_count, self.domain)
    }
}

/// `ROLE: content` lines, role upper-cased.
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_summary_prompt(profile: &SummaryProfile, older: &[ChatMessage], existing: Option<&str>) -> String {
    let transcript = render_transcript(older);
    let mut prompt = String::new();
    let mut rules = Vec::new();

    match existing {
        Some(summary) => {
            prompt.push_str("You are a conversation summarizer. Update the existing summary with the new messages.\n\n");
            prompt.push_str(&format!("EXISTING SUMMARY:\n{}\n\n", summary));
            prompt.push_str(&format!("NEW MESSAGES:\n{}\n\n", transcript));
            prompt.push_str("Create an updated summary that:\n");
            rules.push("Merges the new information into the existing summary".to_string());
            rules.push(format!("Keeps it under {} words", profile.extend_word_limit));
            rules.push("Maintains chronological flow".to_string());
        }
        None => {
            prompt.push_str("You are a conversation summarizer. Summarize this conversation concisely.\n\n");
            prompt.push_str(&format!("CONVERSATION:\n{}\n\n", transcript));
            prompt.push_str("Create a brief summary that:\n");
            rules.push(format!("Keeps it under {} words", profile.fresh_word_limit));
        }
    }
    rules.push("Is written in third person (e.g., \"The user mentioned...\")".to_string());
    rules.extend(profile.focus.iter().map(|item| format!("Captures {}", item)));

    for (i, rule) in rules.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, rule));
    }
    prompt.push_str(&format!("\nThe conversation is about {}.", profile.domain));
    prompt
}

pub struct LlmSummarizer {
    generator: Arc<dyn TextGenerator>,
    profile: SummaryProfile,
}

impl LlmSummarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, profile: SummaryProfile) -> Self {
        Self { generator, profile }
    }

    pub fn profile(&self) -> &SummaryProfile {
        &self.profile
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        older: &[ChatMessage],
        existing: Option<&str>,
    ) -> Result<String, SummarizationError> {
        let prompt = build_summary_prompt(&self.profile, older, existing);
        debug!(
            messages = older.len(),
            extending = existing.is_some(),
            prompt_chars = prompt.len(),
            "Requesting conversation summary"
        );

        let summary = self.generator.generate_text(SUMMARY_SYSTEM_PROMPT, &prompt).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(SummarizationError::EmptySummary);
        }
        Ok(summary.to_string())
    }
}

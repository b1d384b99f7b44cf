//! Structured generator output: chat, recommendation, or chat followed by a recommendation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthNote {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub health: Vec<HealthNote>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorReply {
    Chat { content: String },
    Recommendation(Recommendation),
    Hybrid { chat: String, recommendation: Recommendation },
}

impl GeneratorReply {
    pub fn chat(content: impl Into<String>) -> Self {
        GeneratorReply::Chat { content: content.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GeneratorReply::Chat { .. } => "chat",
            GeneratorReply::Recommendation(_) => "recommendation",
            GeneratorReply::Hybrid { .. } => "hybrid",
        }
    }

    /// Parses raw model output. Anything that is not a well-formed structure
    /// degrades to chat rather than failing.
    pub fn parse(raw: &str) -> Self {
        let trimmed = strip_code_fence(raw.trim());
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) if value.is_object() => Self::from_value(&value, trimmed),
            _ => GeneratorReply::chat(raw.trim()),
        }
    }

    pub fn from_value(value: &Value, raw: &str) -> Self {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("chat");
        match kind {
            "recommendation" => match recommendation_from(value) {
                Some(rec) => GeneratorReply::Recommendation(rec),
                None => {
                    debug!("Malformed recommendation downgraded to chat");
                    GeneratorReply::chat(best_text(value).unwrap_or_else(|| raw.to_string()))
                }
            },
            "hybrid" => {
                let chat = non_empty_str(value, "chat").or_else(|| non_empty_str(value, "content"));
                let rec = value.get("recommendation").and_then(recommendation_from);
                match (chat, rec) {
                    (Some(chat), Some(recommendation)) => GeneratorReply::Hybrid { chat, recommendation },
                    (Some(chat), None) => GeneratorReply::chat(chat),
                    (None, Some(recommendation)) => GeneratorReply::Recommendation(recommendation),
                    (None, None) => GeneratorReply::chat(raw.to_string()),
                }
            }
            _ => GeneratorReply::chat(best_text(value).unwrap_or_else(|| raw.to_string())),
        }
    }
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn best_text(value: &Value) -> Option<String> {
    non_empty_str(value, "content").or_else(|| non_empty_str(value, "title"))
}

fn recommendation_from(value: &Value) -> Option<Recommendation> {
    let title = non_empty_str(value, "title")?;
    let content = non_empty_str(value, "content")?;
    let health = value
        .get("health")
        .and_then(|h| serde_json::from_value::<Vec<HealthNote>>(h.clone()).ok())
        .unwrap_or_default();
    Some(Recommendation { title, content, health })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // language tag runs to the end of the opening line
    let rest = match rest.split_once('\n') {
        Some((tag, body)) if !tag.trim_start().starts_with('{') => body,
        _ => rest,
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

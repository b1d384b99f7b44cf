//! Database schema definitions for the chat history store
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::memory::{ChatMessage, ChatRole};

/// Author of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }

    pub fn chat_role(&self) -> ChatRole {
        match self {
            Sender::User => ChatRole::User,
            Sender::Bot => ChatRole::Assistant,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "bot" => Ok(Sender::Bot),
            other => Err(anyhow::anyhow!("Unknown message sender: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub memory_summary: Option<String>,
    /// Number of leading messages already folded into `memory_summary`.
    pub pruned_count: usize,
    pub last_summary_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: i64,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    /// Inline annotation used in LLM-facing content.
    pub fn annotation(&self) -> String {
        format!("[Attachment: {} ({}) -> {}]", self.filename, self.content_type, self.url)
    }
}

/// Linkage fields shared by every piece of a chunked reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLink {
    pub group_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender: Sender,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub chunk: Option<ChunkLink>,
}

impl StoredMessage {
    /// Renders the message for the LLM, attachments appended as annotations.
    pub fn to_chat_message(&self) -> ChatMessage {
        let mut content = self.text.clone();
        for attachment in &self.attachments {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&attachment.annotation());
        }
        ChatMessage::new(self.sender.chat_role(), content)
    }
}

/// Message about to be appended.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender: Sender,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub chunk: Option<ChunkLink>,
}

impl NewMessage {
    pub fn user(conversation_id: i64, text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            conversation_id,
            sender: Sender::User,
            text: text.into(),
            attachments,
            chunk: None,
        }
    }

    pub fn bot(conversation_id: i64, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender: Sender::Bot,
            text: text.into(),
            attachments: Vec::new(),
            chunk: None,
        }
    }

    pub fn with_chunk(mut self, chunk: ChunkLink) -> Self {
        self.chunk = Some(chunk);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_conversations: i64,
    pub total_messages: i64,
    pub total_attachments: i64,
    pub summarized_conversations: i64,
    pub database_size_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_parse_roundtrip() {
        assert_eq!("user".parse::<Sender>().unwrap(), Sender::User);
        assert_eq!("bot".parse::<Sender>().unwrap(), Sender::Bot);
        assert!("assistant".parse::<Sender>().is_err());
    }

    #[test]
    fn test_attachment_annotation_format() {
        let attachment = Attachment {
            filename: "menu.jpg".to_string(),
            url: "https://cdn.example.com/menu.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            size_bytes: 2048,
        };
        assert_eq!(
            attachment.annotation(),
            "[Attachment: menu.jpg (image/jpeg) -> https://cdn.example.com/menu.jpg]"
        );
        assert!(attachment.is_image());
    }

    #[test]
    fn test_stored_message_renders_attachments_inline() {
        let msg = StoredMessage {
            id: 1,
            conversation_id: 1,
            sender: Sender::User,
            text: "What is this?".to_string(),
            created_at: Utc::now(),
            attachments: vec![Attachment {
                filename: "plate.png".to_string(),
                url: "https://cdn.example.com/plate.png".to_string(),
                content_type: "image/png".to_string(),
                size_bytes: 10,
            }],
            chunk: None,
        };
        let chat = msg.to_chat_message();
        assert_eq!(chat.role, ChatRole::User);
        assert_eq!(
            chat.content,
            "What is this?\n[Attachment: plate.png (image/png) -> https://cdn.example.com/plate.png]"
        );
    }

    #[test]
    fn test_bot_sender_maps_to_assistant() {
        assert_eq!(Sender::Bot.chat_role(), ChatRole::Assistant);
    }
}

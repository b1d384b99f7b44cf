//! History store seam used by the context engine and the turn orchestrator.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::memory_db::schema::{Conversation, NewMessage, StoredMessage};

/// Durable, ordered message log per conversation.
pub trait HistoryStore: Send + Sync {
    fn get_or_create_latest_conversation(&self, user_id: i64) -> anyhow::Result<Conversation>;

    fn latest_conversation(&self, user_id: i64) -> anyhow::Result<Option<Conversation>>;

    fn get_conversation(&self, conversation_id: i64) -> anyhow::Result<Option<Conversation>>;

    fn list_conversations(&self) -> anyhow::Result<Vec<Conversation>>;

    fn append_message(&self, message: NewMessage) -> anyhow::Result<StoredMessage>;

    /// Ascending by `created_at`, then id.
    fn list_messages(&self, conversation_id: i64) -> anyhow::Result<Vec<StoredMessage>>;

    fn last_message_at(&self, conversation_id: i64) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Atomic per conversation. Returns false if the update would move
    /// `pruned_count` backwards or past the stored message count.
    fn update_conversation_summary(
        &self,
        conversation_id: i64,
        summary: &str,
        pruned_count: usize,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    fn clear_conversation(&self, conversation_id: i64) -> anyhow::Result<usize>;
}

/// Process-local store with the same contract as the SQLite one.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    conversations: Arc<DashMap<i64, Conversation>>,
    messages: Arc<DashMap<i64, Vec<StoredMessage>>>,
    next_conversation_id: Arc<AtomicI64>,
    next_message_id: Arc<AtomicI64>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn get_or_create_latest_conversation(&self, user_id: i64) -> anyhow::Result<Conversation> {
        if let Some(conversation) = self.latest_conversation(user_id)? {
            return Ok(conversation);
        }
        let id = self.next_conversation_id.fetch_add(1, Ordering::SeqCst) + 1;
        let conversation = Conversation {
            id,
            user_id,
            created_at: Utc::now(),
            memory_summary: None,
            pruned_count: 0,
            last_summary_at: None,
        };
        self.conversations.insert(id, conversation.clone());
        self.messages.insert(id, Vec::new());
        Ok(conversation)
    }

    fn latest_conversation(&self, user_id: i64) -> anyhow::Result<Option<Conversation>> {
        Ok(self
            .conversations
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .max_by_key(|entry| entry.id)
            .map(|entry| entry.value().clone()))
    }

    fn get_conversation(&self, conversation_id: i64) -> anyhow::Result<Option<Conversation>> {
        Ok(self.conversations.get(&conversation_id).map(|c| c.value().clone()))
    }

    fn list_conversations(&self) -> anyhow::Result<Vec<Conversation>> {
        let mut all: Vec<Conversation> = self.conversations.iter().map(|c| c.value().clone()).collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    fn append_message(&self, message: NewMessage) -> anyhow::Result<StoredMessage> {
        if !self.conversations.contains_key(&message.conversation_id) {
            return Err(anyhow::anyhow!("Conversation {} not found", message.conversation_id));
        }
        let stored = StoredMessage {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
            conversation_id: message.conversation_id,
            sender: message.sender,
            text: message.text,
            created_at: Utc::now(),
            attachments: message.attachments,
            chunk: message.chunk,
        };
        self.messages
            .entry(message.conversation_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn list_messages(&self, conversation_id: i64) -> anyhow::Result<Vec<StoredMessage>> {
        let mut messages = self
            .messages
            .get(&conversation_id)
            .map(|m| m.value().clone())
            .unwrap_or_default();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    fn last_message_at(&self, conversation_id: i64) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self
            .messages
            .get(&conversation_id)
            .and_then(|m| m.iter().map(|msg| msg.created_at).max()))
    }

    fn update_conversation_summary(
        &self,
        conversation_id: i64,
        summary: &str,
        pruned_count: usize,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let stored = self.messages.get(&conversation_id).map(|m| m.len()).unwrap_or(0);
        let Some(mut conversation) = self.conversations.get_mut(&conversation_id) else {
            return Ok(false);
        };
        if pruned_count < conversation.pruned_count || pruned_count > stored {
            return Ok(false);
        }
        conversation.memory_summary = Some(summary.to_string());
        conversation.pruned_count = pruned_count;
        conversation.last_summary_at = Some(at);
        Ok(true)
    }

    fn clear_conversation(&self, conversation_id: i64) -> anyhow::Result<usize> {
        let deleted = self
            .messages
            .get_mut(&conversation_id)
            .map(|mut m| {
                let n = m.len();
                m.clear();
                n
            })
            .unwrap_or(0);
        if let Some(mut conversation) = self.conversations.get_mut(&conversation_id) {
            conversation.memory_summary = None;
            conversation.pruned_count = 0;
            conversation.last_summary_at = None;
        }
        Ok(deleted)
    }
}

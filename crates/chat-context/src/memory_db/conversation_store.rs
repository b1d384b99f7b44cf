use crate::memory_db::schema::*;
use rusqlite::{params, OptionalExtension, Row};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tracing::{info, debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

const CONVERSATION_COLUMNS: &str =
    "id, user_id, created_at, memory_summary, pruned_count, last_summary_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender, text, created_at, group_id, chunk_index, total_chunks";

/// Fixed-width UTC timestamps so that TEXT ordering matches time ordering.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed conversations, messages and attachments.
pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn latest_conversation(&self, user_id: i64) -> anyhow::Result<Option<Conversation>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM conversations WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
            CONVERSATION_COLUMNS
        );
        let conversation = conn
            .query_row(&sql, [user_id], |row| Ok(Self::row_to_conversation(row)))
            .optional()?
            .transpose()?;
        Ok(conversation)
    }

    /// Two first messages racing here may create two rows; the newest id wins afterwards.
    pub fn get_or_create_latest_conversation(&self, user_id: i64) -> anyhow::Result<Conversation> {
        if let Some(conversation) = self.latest_conversation(user_id)? {
            return Ok(conversation);
        }

        let now = Utc::now();
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO conversations (user_id, created_at, pruned_count) VALUES (?1, ?2, 0)",
            params![user_id, format_timestamp(&now)],
        )?;
        let id = conn.last_insert_rowid();

        info!(conversation_id = id, user_id, "Created conversation");
        Ok(Conversation {
            id,
            user_id,
            created_at: now,
            memory_summary: None,
            pruned_count: 0,
            last_summary_at: None,
        })
    }

    pub fn get_conversation(&self, conversation_id: i64) -> anyhow::Result<Option<Conversation>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
        let conversation = conn
            .query_row(&sql, [conversation_id], |row| Ok(Self::row_to_conversation(row)))
            .optional()?
            .transpose()?;
        Ok(conversation)
    }

    pub fn list_conversations(&self) -> anyhow::Result<Vec<Conversation>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM conversations ORDER BY id", CONVERSATION_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut conversations = Vec::new();
        while let Some(row) = rows.next()? {
            conversations.push(Self::row_to_conversation(row)?);
        }
        Ok(conversations)
    }

    /// Inserts the message and its attachments in one transaction.
    pub fn append_message(&self, message: &NewMessage) -> anyhow::Result<StoredMessage> {
        let mut conn = self.get_conn()?;
        let now = Utc::now();
        let now_str = format_timestamp(&now);

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO messages
             (conversation_id, sender, text, created_at, group_id, chunk_index, total_chunks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.conversation_id,
                message.sender.as_str(),
                message.text,
                &now_str,
                message.chunk.as_ref().map(|c| c.group_id.as_str()),
                message.chunk.as_ref().map(|c| c.chunk_index as i64),
                message.chunk.as_ref().map(|c| c.total_chunks as i64),
            ],
        )?;
        let id = tx.last_insert_rowid();

        for attachment in &message.attachments {
            tx.execute(
                "INSERT INTO message_attachments
                 (message_id, filename, url, content_type, size_bytes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    attachment.filename,
                    attachment.url,
                    attachment.content_type,
                    attachment.size_bytes,
                    &now_str,
                ],
            )?;
        }
        tx.commit()?;

        debug!(
            message_id = id,
            conversation_id = message.conversation_id,
            sender = %message.sender,
            attachments = message.attachments.len(),
            "Stored message"
        );

        Ok(StoredMessage {
            id,
            conversation_id: message.conversation_id,
            sender: message.sender,
            text: message.text.clone(),
            created_at: now,
            attachments: message.attachments.clone(),
            chunk: message.chunk.clone(),
        })
    }

    /// Messages in ascending order, ties broken by id.
    pub fn list_messages(&self, conversation_id: i64) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;

        let mut attachments: HashMap<i64, Vec<Attachment>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT a.message_id, a.filename, a.url, a.content_type, a.size_bytes
                 FROM message_attachments a
                 JOIN messages m ON m.id = a.message_id
                 WHERE m.conversation_id = ?1
                 ORDER BY a.id",
            )?;
            let mut rows = stmt.query([conversation_id])?;
            while let Some(row) = rows.next()? {
                let message_id: i64 = row.get(0)?;
                attachments.entry(message_id).or_default().push(Attachment {
                    filename: row.get(1)?,
                    url: row.get(2)?,
                    content_type: row.get(3)?,
                    size_bytes: row.get(4)?,
                });
            }
        }

        let sql = format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([conversation_id])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            let mut message = Self::row_to_stored_message(row)?;
            if let Some(found) = attachments.remove(&message.id) {
                message.attachments = found;
            }
            messages.push(message);
        }
        Ok(messages)
    }

    pub fn last_message_at(&self, conversation_id: i64) -> anyhow::Result<Option<DateTime<Utc>>> {
        let conn = self.get_conn()?;
        let last: Option<String> = conn.query_row(
            "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(last.as_deref().and_then(Self::parse_datetime_safe))
    }

    /// Single guarded UPDATE: `pruned_count` never moves backwards and never
    /// exceeds the number of stored messages. Returns false when the guard rejects it.
    pub fn update_conversation_summary(
        &self,
        conversation_id: i64,
        summary: &str,
        pruned_count: usize,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let pruned = pruned_count as i64;
        let changed = conn.execute(
            "UPDATE conversations
             SET memory_summary = ?1, pruned_count = ?2, last_summary_at = ?3
             WHERE id = ?4
               AND pruned_count <= ?2
               AND ?2 <= (SELECT COUNT(*) FROM messages WHERE conversation_id = ?4)",
            params![summary, pruned, format_timestamp(&at), conversation_id],
        )?;

        if changed == 0 {
            warn!(conversation_id, pruned_count, "Summary update rejected by coverage guard");
        }
        Ok(changed > 0)
    }

    /// Deletes every message and attachment and resets the summary state.
    pub fn clear_conversation(&self, conversation_id: i64) -> anyhow::Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM message_attachments
             WHERE message_id IN (SELECT id FROM messages WHERE conversation_id = ?1)",
            [conversation_id],
        )?;
        let deleted = tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [conversation_id])?;
        tx.execute(
            "UPDATE conversations
             SET memory_summary = NULL, pruned_count = 0, last_summary_at = NULL
             WHERE id = ?1",
            [conversation_id],
        )?;
        tx.commit()?;

        info!(conversation_id, deleted, "Cleared conversation");
        Ok(deleted)
    }

    fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn row_to_conversation(row: &Row) -> anyhow::Result<Conversation> {
        let created_at = Self::parse_datetime_safe(&row.get::<_, String>(2)?)
            .unwrap_or_else(|| { warn!("Failed parse conversation created_at"); Utc::now() });
        let last_summary_at = row
            .get::<_, Option<String>>(5)?
            .as_deref()
            .and_then(Self::parse_datetime_safe);
        let pruned: i64 = row.get(4)?;

        Ok(Conversation {
            id: row.get(0)?,
            user_id: row.get(1)?,
            created_at,
            memory_summary: row.get(3)?,
            pruned_count: pruned.max(0) as usize,
            last_summary_at,
        })
    }

    fn row_to_stored_message(row: &Row) -> anyhow::Result<StoredMessage> {
        let created_at = Self::parse_datetime_safe(&row.get::<_, String>(4)?)
            .unwrap_or_else(|| { warn!("Failed parse message created_at"); Utc::now() });
        let sender: String = row.get(2)?;

        let group_id: Option<String> = row.get(5)?;
        let chunk_index: Option<i64> = row.get(6)?;
        let total_chunks: Option<i64> = row.get(7)?;
        let chunk = match (group_id, chunk_index, total_chunks) {
            (Some(group_id), Some(index), Some(total)) => Some(ChunkLink {
                group_id,
                chunk_index: index as u32,
                total_chunks: total as u32,
            }),
            _ => None,
        };

        Ok(StoredMessage {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender: sender.parse()?,
            text: row.get(3)?,
            created_at,
            attachments: Vec::new(),
            chunk,
        })
    }
}

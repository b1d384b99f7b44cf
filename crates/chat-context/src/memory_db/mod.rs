//! Chat history database module - SQLite-based storage for conversations, messages and attachments
pub mod schema;
pub mod migration;
pub mod conversation_store;
pub mod history_store;
pub use schema::*;
pub use migration::MigrationManager;
pub use conversation_store::ConversationStore;
pub use history_store::{HistoryStore, InMemoryHistoryStore};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

pub struct MemoryDatabase {
    pub conversations: ConversationStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MemoryDatabase {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening chat database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            let mut migrator = migration::MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        let pool = Arc::new(pool);
        info!("Chat database initialized successfully");
        Ok(Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            pool,
        })
    }

    /// Single shared connection: every pooled handle must see the same in-memory database.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            let mut migrator = migration::MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        let pool = Arc::new(pool);
        Ok(Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            pool,
        })
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}

impl HistoryStore for MemoryDatabase {
    fn get_or_create_latest_conversation(&self, user_id: i64) -> anyhow::Result<Conversation> {
        self.conversations.get_or_create_latest_conversation(user_id)
    }

    fn latest_conversation(&self, user_id: i64) -> anyhow::Result<Option<Conversation>> {
        self.conversations.latest_conversation(user_id)
    }

    fn get_conversation(&self, conversation_id: i64) -> anyhow::Result<Option<Conversation>> {
        self.conversations.get_conversation(conversation_id)
    }

    fn list_conversations(&self) -> anyhow::Result<Vec<Conversation>> {
        self.conversations.list_conversations()
    }

    fn append_message(&self, message: NewMessage) -> anyhow::Result<StoredMessage> {
        self.conversations.append_message(&message)
    }

    fn list_messages(&self, conversation_id: i64) -> anyhow::Result<Vec<StoredMessage>> {
        self.conversations.list_messages(conversation_id)
    }

    fn last_message_at(&self, conversation_id: i64) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.conversations.last_message_at(conversation_id)
    }

    fn update_conversation_summary(
        &self,
        conversation_id: i64,
        summary: &str,
        pruned_count: usize,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self.conversations
            .update_conversation_summary(conversation_id, summary, pruned_count, at)
    }

    fn clear_conversation(&self, conversation_id: i64) -> anyhow::Result<usize> {
        self.conversations.clear_conversation(conversation_id)
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

//! Nightly reset of idle conversations.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::memory_db::HistoryStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearingStats {
    pub cleared: usize,
    pub active: usize,
    pub messages_deleted: usize,
    pub failed: usize,
}

pub struct ChatClearingWorker {
    store: Arc<dyn HistoryStore>,
    idle_for: Duration,
}

impl ChatClearingWorker {
    pub fn new(store: Arc<dyn HistoryStore>, idle_for: Duration) -> Self {
        Self { store, idle_for }
    }

    pub fn run_once(&self) -> anyhow::Result<ClearingStats> {
        self.run_at(Utc::now())
    }

    /// Clears every conversation whose newest message is older than the idle window.
    /// Conversations without messages count as idle.
    pub fn run_at(&self, now: DateTime<Utc>) -> anyhow::Result<ClearingStats> {
        let cutoff = now - self.idle_for;
        let mut stats = ClearingStats::default();

        for conversation in self.store.list_conversations()? {
            let last = match self.store.last_message_at(conversation.id) {
                Ok(last) => last,
                Err(e) => {
                    warn!(conversation_id = conversation.id, error = %e, "Failed to read last activity");
                    stats.failed += 1;
                    continue;
                }
            };
            if last.map(|at| at > cutoff).unwrap_or(false) {
                stats.active += 1;
                continue;
            }
            match self.store.clear_conversation(conversation.id) {
                Ok(deleted) => {
                    stats.cleared += 1;
                    stats.messages_deleted += deleted;
                }
                Err(e) => {
                    warn!(conversation_id = conversation.id, error = %e, "Failed to clear conversation");
                    stats.failed += 1;
                }
            }
        }

        info!(
            cleared = stats.cleared,
            active = stats.active,
            messages_deleted = stats.messages_deleted,
            failed = stats.failed,
            "Daily chat clearing finished"
        );
        Ok(stats)
    }
}

//! Deferred summarization: sweeps every conversation off the turn path.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context_engine::{SummarizationEngine, SummaryOutcome};
use crate::memory_db::HistoryStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub processed: usize,
    pub summarized: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SummaryWorker {
    store: Arc<dyn HistoryStore>,
    engine: Arc<SummarizationEngine>,
}

impl SummaryWorker {
    pub fn new(store: Arc<dyn HistoryStore>, engine: Arc<SummarizationEngine>) -> Self {
        Self { store, engine }
    }

    pub async fn run_sweep(&self) -> anyhow::Result<SweepStats> {
        let conversations = self.store.list_conversations()?;
        let recent_count = self.engine.config().recent_count;
        let mut stats = SweepStats::default();

        for conversation in conversations {
            stats.processed += 1;
            let messages = match self.store.list_messages(conversation.id) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(conversation_id = conversation.id, error = %e, "Failed to load messages for sweep");
                    stats.failed += 1;
                    continue;
                }
            };
            if messages.len() <= recent_count {
                stats.skipped += 1;
                continue;
            }

            match self.engine.summarize_if_due(&conversation, &messages, None).await {
                Ok(SummaryOutcome::Summarized { .. }) => stats.summarized += 1,
                Ok(outcome) => {
                    debug!(conversation_id = conversation.id, outcome = outcome.label(), "Sweep skipped conversation");
                    stats.skipped += 1;
                }
                Err(e) => {
                    warn!(conversation_id = conversation.id, error = %e, "Summarization failed during sweep");
                    stats.failed += 1;
                }
            }
        }

        info!(
            processed = stats.processed,
            summarized = stats.summarized,
            skipped = stats.skipped,
            failed = stats.failed,
            "Summary sweep finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_engine::summarization_engine::tests::RecordingSummarizer;
    use crate::context_engine::{SummarizationConfig, SummaryProfile};
    use crate::memory_db::{InMemoryHistoryStore, NewMessage};

    fn seed(store: &InMemoryHistoryStore, user_id: i64, count: usize, chars: usize) -> i64 {
        let conv = store.get_or_create_latest_conversation(user_id).unwrap();
        for i in 0..count {
            store
                .append_message(NewMessage::user(conv.id, format!("{:02}{}", i, "z".repeat(chars)), vec![]))
                .unwrap();
        }
        conv.id
    }

    #[tokio::test]
    async fn test_sweep_counts_each_kind() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let big = seed(&store, 1, 12, 1000);
        seed(&store, 2, 5, 1000);
        seed(&store, 3, 12, 5);

        let summarizer = Arc::new(RecordingSummarizer::ok("Summary."));
        let engine = Arc::new(SummarizationEngine::new(
            store.clone(),
            summarizer.clone(),
            SummaryProfile::default(),
            SummarizationConfig::default(),
        ));
        let worker = SummaryWorker::new(store.clone(), engine);

        let stats = worker.run_sweep().await.unwrap();
        assert_eq!(stats, SweepStats { processed: 3, summarized: 1, skipped: 2, failed: 0 });
        assert_eq!(store.get_conversation(big).unwrap().unwrap().pruned_count, 2);

        // nothing new to fold on the second pass
        let again = worker.run_sweep().await.unwrap();
        assert_eq!(again.summarized, 0);
        assert_eq!(summarizer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_catches_up_after_window_slides() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let conv = seed(&store, 1, 12, 1000);
        let engine = Arc::new(SummarizationEngine::new(
            store.clone(),
            Arc::new(RecordingSummarizer::ok("Summary.")),
            SummaryProfile::default(),
            SummarizationConfig::default(),
        ));
        let worker = SummaryWorker::new(store.clone(), engine);
        worker.run_sweep().await.unwrap();

        // short history under the threshold, one message outside the window and uncovered
        store.clear_conversation(conv).unwrap();
        seed(&store, 1, 11, 5);
        store.update_conversation_summary(conv, "Kept.", 0, chrono::Utc::now()).unwrap();

        let stats = worker.run_sweep().await.unwrap();
        assert_eq!(stats.summarized, 1);
        assert_eq!(store.get_conversation(conv).unwrap().unwrap().pruned_count, 1);
    }
}

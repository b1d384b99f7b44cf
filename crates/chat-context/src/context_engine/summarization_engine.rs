//! Decides when to compress history and folds older turns into the rolling summary.

use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context_engine::summarizer::{Summarizer, SummaryProfile};
use crate::context_engine::token_estimator::TokenEstimator;
use crate::memory::ChatMessage;
use crate::memory_db::{Conversation, HistoryStore, StoredMessage};

/// Where the trigger check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarizationMode {
    /// Checked on every turn, before context is built.
    Inline,
    /// Checked by the periodic sweep only.
    Deferred,
}

impl FromStr for SummarizationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "deferred" | "background" => Ok(Self::Deferred),
            other => Err(anyhow::anyhow!("Unknown summary mode '{}', expected inline or deferred", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummarizationConfig {
    pub recent_count: usize,
    pub token_threshold: usize,
    pub mode: SummarizationMode,
    /// Once a summary exists, fold messages that slid out of the window
    /// even when the token total is under the threshold.
    pub close_coverage_gaps: bool,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            recent_count: 10,
            token_threshold: 3000,
            mode: SummarizationMode::Deferred,
            close_coverage_gaps: true,
        }
    }
}

/// Strictly greater than: a total equal to the threshold is not due.
pub fn should_summarize(history_tokens: usize, summary_tokens: usize, new_tokens: usize, threshold: usize) -> bool {
    history_tokens + summary_tokens + new_tokens > threshold
}

/// Everything except the last `recent_count` entries.
pub fn select_older<T>(messages: &[T], recent_count: usize) -> &[T] {
    &messages[..messages.len().saturating_sub(recent_count)]
}

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryOutcome {
    /// Not enough messages outside the recent window.
    TooShort,
    BelowThreshold { total_tokens: usize },
    /// Every older message is already covered by the summary.
    UpToDate,
    /// The store refused the update because a newer summary already landed.
    Superseded,
    Summarized {
        summary: String,
        pruned_count: usize,
        folded: usize,
        used_fallback: bool,
    },
}

impl SummaryOutcome {
    pub fn is_summarized(&self) -> bool {
        matches!(self, SummaryOutcome::Summarized { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SummaryOutcome::TooShort => "too_short",
            SummaryOutcome::BelowThreshold { .. } => "below_threshold",
            SummaryOutcome::UpToDate => "up_to_date",
            SummaryOutcome::Superseded => "superseded",
            SummaryOutcome::Summarized { used_fallback: true, .. } => "fallback",
            SummaryOutcome::Summarized { .. } => "summarized",
        }
    }
}

pub struct SummarizationEngine {
    store: Arc<dyn HistoryStore>,
    summarizer: Arc<dyn Summarizer>,
    estimator: TokenEstimator,
    profile: SummaryProfile,
    config: SummarizationConfig,
}

impl SummarizationEngine {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        summarizer: Arc<dyn Summarizer>,
        profile: SummaryProfile,
        config: SummarizationConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            estimator: TokenEstimator::default(),
            profile,
            config,
        }
    }

    pub fn config(&self) -> &SummarizationConfig {
        &self.config
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Applies the trigger and selection policy to one conversation and
    /// commits the new summary. `incoming` is the not-yet-persisted user text, if any.
    pub async fn summarize_if_due(
        &self,
        conversation: &Conversation,
        messages: &[StoredMessage],
        incoming: Option<&str>,
    ) -> anyhow::Result<SummaryOutcome> {
        let rendered: Vec<ChatMessage> = messages.iter().map(StoredMessage::to_chat_message).collect();
        let older = select_older(&rendered, self.config.recent_count);
        if older.is_empty() {
            return Ok(SummaryOutcome::TooShort);
        }

        let existing = conversation.memory_summary.as_deref();
        let history_tokens = self.estimator.estimate_batch(&rendered);
        let summary_tokens = self.estimator.estimate_opt(existing);
        let new_tokens = self.estimator.estimate_opt(incoming);
        let total_tokens = history_tokens + summary_tokens + new_tokens;

        let covered = conversation.pruned_count.min(older.len());
        let uncovered = &older[covered..];

        let over_threshold =
            should_summarize(history_tokens, summary_tokens, new_tokens, self.config.token_threshold);
        let coverage_gap = self.config.close_coverage_gaps && existing.is_some() && !uncovered.is_empty();

        if !over_threshold && !coverage_gap {
            debug!(
                conversation_id = conversation.id,
                total_tokens,
                threshold = self.config.token_threshold,
                "Summarization not due"
            );
            return Ok(SummaryOutcome::BelowThreshold { total_tokens });
        }
        if uncovered.is_empty() {
            return Ok(SummaryOutcome::UpToDate);
        }

        let pruned_count = older.len();
        let (summary, used_fallback) = match self.summarizer.summarize(uncovered, existing).await {
            Ok(summary) => (summary, false),
            Err(e) => {
                warn!(
                    conversation_id = conversation.id,
                    error = %e,
                    "Summarizer failed, using placeholder summary"
                );
                (self.profile.fallback_summary(pruned_count), true)
            }
        };

        let stored = self
            .store
            .update_conversation_summary(conversation.id, &summary, pruned_count, Utc::now())?;
        if !stored {
            crate::metrics::inc_summary("superseded");
            return Ok(SummaryOutcome::Superseded);
        }

        info!(
            conversation_id = conversation.id,
            folded = uncovered.len(),
            pruned_count,
            total_tokens,
            used_fallback,
            "Conversation summary updated"
        );
        crate::metrics::inc_summary(if used_fallback { "fallback" } else { "summarized" });

        Ok(SummaryOutcome::Summarized {
            summary,
            pruned_count,
            folded: uncovered.len(),
            used_fallback,
        })
    }

    /// Loads the conversation fresh from the store and applies the policy.
    pub async fn summarize_conversation(&self, conversation_id: i64) -> anyhow::Result<SummaryOutcome> {
        let conversation = self
            .store
            .get_conversation(conversation_id)?
            .ok_or_else(|| anyhow::anyhow!("Conversation {} not found", conversation_id))?;
        let messages = self.store.list_messages(conversation_id)?;
        self.summarize_if_due(&conversation, &messages, None).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context_engine::context_filter;
    use crate::error::{GenerationError, SummarizationError};
    use crate::memory_db::{InMemoryHistoryStore, NewMessage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a canned summary and records what it was asked to fold.
    pub(crate) struct RecordingSummarizer {
        pub reply: Option<String>,
        pub calls: Mutex<Vec<(Vec<ChatMessage>, Option<String>)>>,
    }

    impl RecordingSummarizer {
        pub fn ok(reply: &str) -> Self {
            Self { reply: Some(reply.to_string()), calls: Mutex::new(Vec::new()) }
        }

        pub fn failing() -> Self {
            Self { reply: None, calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Summarizer for RecordingSummarizer {
        async fn summarize(
            &self,
            older: &[ChatMessage],
            existing: Option<&str>,
        ) -> Result<String, SummarizationError> {
            self.calls
                .lock()
                .unwrap()
                .push((older.to_vec(), existing.map(str::to_string)));
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(SummarizationError::Generation(GenerationError::Timeout(
                    std::time::Duration::from_secs(1),
                ))),
            }
        }
    }

    fn seed(store: &InMemoryHistoryStore, count: usize, chars: usize) -> Conversation {
        let conv = store.get_or_create_latest_conversation(1).unwrap();
        for i in 0..count {
            let text = format!("{:02}{}", i, "x".repeat(chars.saturating_sub(2)));
            let msg = if i % 2 == 0 {
                NewMessage::user(conv.id, text, vec![])
            } else {
                NewMessage::bot(conv.id, text)
            };
            store.append_message(msg).unwrap();
        }
        store.get_conversation(conv.id).unwrap().unwrap()
    }

    fn engine(store: Arc<InMemoryHistoryStore>, summarizer: Arc<RecordingSummarizer>, threshold: usize) -> SummarizationEngine {
        SummarizationEngine::new(
            store,
            summarizer,
            SummaryProfile::default(),
            SummarizationConfig { token_threshold: threshold, ..SummarizationConfig::default() },
        )
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!should_summarize(1000, 1000, 1000, 3000));
        assert!(should_summarize(1000, 1000, 1001, 3000));
        assert!(!should_summarize(0, 0, 0, 0));
    }

    #[test]
    fn test_select_older_partition() {
        let items: Vec<usize> = (0..12).collect();
        assert_eq!(select_older(&items, 10), &[0, 1]);
        assert!(select_older(&items[..10], 10).is_empty());
        assert!(select_older(&items[..3], 10).is_empty());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("inline".parse::<SummarizationMode>().unwrap(), SummarizationMode::Inline);
        assert_eq!("Deferred".parse::<SummarizationMode>().unwrap(), SummarizationMode::Deferred);
        assert!("sometimes".parse::<SummarizationMode>().is_err());
    }

    #[tokio::test]
    async fn test_twelve_messages_over_threshold_fold_two() {
        let store = Arc::new(InMemoryHistoryStore::new());
        // 12 messages of 980 chars: 280 + 4 tokens each, 3408 in total
        let conv = seed(&store, 12, 980);
        let summarizer = Arc::new(RecordingSummarizer::ok("The user wants spicy food."));
        let engine = engine(store.clone(), summarizer.clone(), 3000);

        let messages = store.list_messages(conv.id).unwrap();
        let outcome = engine.summarize_if_due(&conv, &messages, None).await.unwrap();

        assert_eq!(
            outcome,
            SummaryOutcome::Summarized {
                summary: "The user wants spicy food.".to_string(),
                pruned_count: 2,
                folded: 2,
                used_fallback: false,
            }
        );
        let calls = summarizer.calls.lock().unwrap();
        assert_eq!(calls[0].0.len(), 2);
        assert!(calls[0].0[0].content.starts_with("00"));
        assert!(calls[0].1.is_none());

        let conv = store.get_conversation(conv.id).unwrap().unwrap();
        assert_eq!(conv.pruned_count, 2);
        let rendered: Vec<ChatMessage> = messages.iter().map(StoredMessage::to_chat_message).collect();
        let context = context_filter::filter(&rendered, conv.memory_summary.as_deref(), 10);
        assert_eq!(context.len(), 11);
    }

    #[tokio::test]
    async fn test_below_threshold_is_noop() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let conv = seed(&store, 12, 10);
        let summarizer = Arc::new(RecordingSummarizer::ok("unused"));
        let engine = engine(store.clone(), summarizer.clone(), 3000);

        let messages = store.list_messages(conv.id).unwrap();
        let outcome = engine.summarize_if_due(&conv, &messages, Some("hello")).await.unwrap();
        assert!(matches!(outcome, SummaryOutcome::BelowThreshold { .. }));
        assert!(summarizer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_history_skips_even_when_over_threshold() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let conv = seed(&store, 10, 2000);
        let engine = engine(store.clone(), Arc::new(RecordingSummarizer::ok("unused")), 100);

        let messages = store.list_messages(conv.id).unwrap();
        let outcome = engine.summarize_if_due(&conv, &messages, None).await.unwrap();
        assert_eq!(outcome, SummaryOutcome::TooShort);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_placeholder() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let conv = seed(&store, 14, 10);
        let engine = engine(store.clone(), Arc::new(RecordingSummarizer::failing()), 0);

        let messages = store.list_messages(conv.id).unwrap();
        let outcome = engine.summarize_if_due(&conv, &messages, None).await.unwrap();

        assert_eq!(outcome.label(), "fallback");
        let conv = store.get_conversation(conv.id).unwrap().unwrap();
        assert_eq!(
            conv.memory_summary.as_deref(),
            Some("Conversation covering 4 messages about food recommendations and dietary preferences.")
        );
        assert_eq!(conv.pruned_count, 4);
    }

    #[tokio::test]
    async fn test_extension_folds_only_uncovered_messages() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let conv = seed(&store, 12, 10);
        store.update_conversation_summary(conv.id, "Earlier summary.", 2, Utc::now()).unwrap();
        for text in ["03 more", "04 more"] {
            store.append_message(NewMessage::user(conv.id, text, vec![])).unwrap();
        }
        let conv = store.get_conversation(conv.id).unwrap().unwrap();

        let summarizer = Arc::new(RecordingSummarizer::ok("Updated summary."));
        // threshold far above the total: only the coverage gap makes it due
        let engine = engine(store.clone(), summarizer.clone(), 100_000);
        let messages = store.list_messages(conv.id).unwrap();
        let outcome = engine.summarize_if_due(&conv, &messages, None).await.unwrap();

        assert!(outcome.is_summarized());
        let calls = summarizer.calls.lock().unwrap();
        assert_eq!(calls[0].0.len(), 2);
        assert!(calls[0].0[0].content.starts_with("02"));
        assert_eq!(calls[0].1.as_deref(), Some("Earlier summary."));

        let conv = store.get_conversation(conv.id).unwrap().unwrap();
        assert_eq!(conv.pruned_count, 4);
        assert_eq!(conv.memory_summary.as_deref(), Some("Updated summary."));
    }

    #[tokio::test]
    async fn test_fully_covered_history_is_up_to_date() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let conv = seed(&store, 12, 10);
        store.update_conversation_summary(conv.id, "s", 2, Utc::now()).unwrap();
        let conv = store.get_conversation(conv.id).unwrap().unwrap();

        let summarizer = Arc::new(RecordingSummarizer::ok("unused"));
        let engine = engine(store.clone(), summarizer.clone(), 0);
        let messages = store.list_messages(conv.id).unwrap();
        assert_eq!(engine.summarize_if_due(&conv, &messages, None).await.unwrap(), SummaryOutcome::UpToDate);
        assert!(summarizer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_superseded() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let stale = seed(&store, 14, 10);
        store.update_conversation_summary(stale.id, "newer", 4, Utc::now()).unwrap();

        // the stale snapshot still says pruned_count = 0, but the store has 4
        let engine = engine(store.clone(), Arc::new(RecordingSummarizer::ok("older view")), 0);
        let messages: Vec<StoredMessage> = store.list_messages(stale.id).unwrap().into_iter().take(13).collect();
        let outcome = engine.summarize_if_due(&stale, &messages, None).await.unwrap();

        assert_eq!(outcome, SummaryOutcome::Superseded);
        let conv = store.get_conversation(stale.id).unwrap().unwrap();
        assert_eq!(conv.memory_summary.as_deref(), Some("newer"));
    }
}

//! Context engine module - bounded context windows and rolling summaries

pub mod token_estimator;
pub mod context_filter;
pub mod summarizer;
pub mod summarization_engine;
pub mod personalization;

pub use token_estimator::TokenEstimator;
pub use context_filter::{filter, is_summary_entry, summary_entry, SUMMARY_MARKER};
pub use summarizer::{LlmSummarizer, Summarizer, SummaryProfile, TextGenerator};
pub use summarization_engine::{
    select_older, should_summarize, SummarizationConfig, SummarizationEngine, SummarizationMode, SummaryOutcome,
};
pub use personalization::{context_cadence, ContextCadence, TimeOfDay};

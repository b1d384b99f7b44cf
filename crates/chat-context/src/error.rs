//! Error taxonomy for the turn path, the generator and the summarizer.
//!
//! Storage and wiring code stays on `anyhow`; these enums exist where callers
//! have to branch on the failure kind.

use std::time::Duration;
use thiserror::Error;

/// Inbound message rejected before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("message is {len} characters long, the limit is {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("{count} attachments supplied, the limit is {max}")]
    TooManyAttachments { count: usize, max: usize },
}

/// Failure talking to an LLM backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("LLM backend request failed: {0}")]
    Transport(String),

    #[error("LLM backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse LLM response: {0}")]
    InvalidResponse(String),

    #[error("LLM backend returned an empty completion")]
    EmptyCompletion,

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("summarizer produced an empty summary")]
    EmptySummary,
}

/// Errors that end a turn before a reply can be produced.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("no conversation exists for user {0}")]
    NoConversation(i64),
}

impl TurnError {
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }
}

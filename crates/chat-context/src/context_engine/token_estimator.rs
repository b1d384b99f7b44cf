//! Character-ratio token estimation.

use std::fmt::{self, Write};

use crate::memory::ChatMessage;

/// Cheap tokenizer stand-in, biased slightly high.
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    pub chars_per_token: f64,
    pub per_message_overhead: usize,
    /// Returned when a value cannot be rendered as text.
    pub fallback_tokens: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 3.5,
            per_message_overhead: 4,
            fallback_tokens: 100,
        }
    }
}

impl TokenEstimator {
    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count() as f64;
        ((chars / self.chars_per_token).ceil() as usize).max(1)
    }

    pub fn estimate_opt(&self, text: Option<&str>) -> usize {
        text.map(|t| self.estimate(t)).unwrap_or(0)
    }

    /// Estimates anything displayable; a formatter error yields `fallback_tokens`.
    pub fn estimate_display<T: fmt::Display + ?Sized>(&self, value: &T) -> usize {
        let mut rendered = String::new();
        match write!(rendered, "{}", value) {
            Ok(()) => self.estimate(&rendered),
            Err(_) => self.fallback_tokens,
        }
    }

    /// Content tokens plus framing overhead per message.
    pub fn estimate_batch(&self, messages: &[ChatMessage]) -> usize {
        messages
            .iter()
            .map(|m| self.estimate(&m.content) + self.per_message_overhead)
            .sum()
    }
}

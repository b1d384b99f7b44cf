//! Sentence-aligned splitting of long replies for progressive delivery.

use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

lazy_static! {
    /// Sentence terminator followed by whitespace; the whitespace stays with the sentence.
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]\s+").unwrap();
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub max_chunk_chars: usize,
    /// Replies at or under this length are never chunked.
    pub min_length_to_chunk: usize,
    pub base_delay: Duration,
    /// Simulated typing speed; zero disables the length-dependent part.
    pub chars_per_second: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 150,
            min_length_to_chunk: 100,
            base_delay: Duration::from_millis(400),
            chars_per_second: 60.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseChunker {
    config: ChunkerConfig,
}

impl ResponseChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn should_chunk(&self, text: &str, streaming_requested: bool) -> bool {
        streaming_requested && text.chars().count() > self.config.min_length_to_chunk
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.config.max_chunk_chars)
    }

    /// `base_delay + len(chunk) / chars_per_second`
    pub fn delivery_delay(&self, chunk: &str) -> Duration {
        if self.config.chars_per_second <= 0.0 {
            return self.config.base_delay;
        }
        let typing = chunk.chars().count() as f64 / self.config.chars_per_second;
        self.config.base_delay + Duration::from_secs_f64(typing)
    }
}

/// Splits at sentence boundaries, packing whole sentences greedily up to
/// `max_chunk_chars`. An oversized sentence becomes its own chunk. The
/// concatenation of the result is always exactly `text`.
pub fn chunk_text(text: &str, max_chunk_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in split_sentences(text) {
        let len = sentence.chars().count();
        if current_len > 0 && current_len + len > max_chunk_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(sentence);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for boundary in SENTENCE_END.find_iter(text) {
        sentences.push(&text[start..boundary.end()]);
        start = boundary.end();
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sentence(len: usize, end: char) -> String {
        // `len` characters including the terminator and the trailing space
        let mut s = "a".repeat(len - 2);
        s.push(end);
        s.push(' ');
        s
    }

    #[test]
    fn test_four_sentences_into_three_chunks() {
        let text = format!(
            "{}{}{}{}",
            sentence(100, '.'),
            sentence(40, '!'),
            sentence(90, '?'),
            sentence(90, '.'),
        );
        assert_eq!(text.chars().count(), 320);

        let chunks = chunk_text(&text, 150);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 140);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello there. How are you?", 150);
        assert_eq!(chunks, vec!["Hello there. How are you?".to_string()]);
    }

    #[test]
    fn test_no_punctuation_stays_whole() {
        let text = "x".repeat(400);
        let chunks = chunk_text(&text, 150);
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn test_oversized_sentence_kept_whole_between_others() {
        let long = sentence(200, '.');
        let text = format!("Hi. {}Bye.", long);
        let chunks = chunk_text(&text, 150);
        assert_eq!(chunks, vec!["Hi. ".to_string(), long, "Bye.".to_string()]);
    }

    #[test]
    fn test_decimal_points_do_not_split() {
        let chunks = chunk_text("It costs 2.50 naira. Cheap!", 10);
        assert_eq!(chunks, vec!["It costs 2.50 naira. ".to_string(), "Cheap!".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(chunk_text("", 150).is_empty());
    }

    #[test]
    fn test_should_chunk_requires_streaming_and_length() {
        let chunker = ResponseChunker::default();
        let long = "a".repeat(101);
        assert!(chunker.should_chunk(&long, true));
        assert!(!chunker.should_chunk(&long, false));
        assert!(!chunker.should_chunk(&"a".repeat(100), true));
    }

    #[test]
    fn test_delivery_delay() {
        let chunker = ResponseChunker::new(ChunkerConfig {
            base_delay: Duration::from_millis(500),
            chars_per_second: 100.0,
            ..ChunkerConfig::default()
        });
        assert_eq!(chunker.delivery_delay(&"a".repeat(100)), Duration::from_millis(1500));

        let instant = ResponseChunker::new(ChunkerConfig {
            base_delay: Duration::ZERO,
            chars_per_second: 0.0,
            ..ChunkerConfig::default()
        });
        assert_eq!(instant.delivery_delay("anything"), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_concatenation_restores_text(text in "[a-zA-Z ,.!?\n]{0,600}", max in 1usize..200) {
            let chunks = chunk_text(&text, max);
            prop_assert_eq!(chunks.concat(), text);
            prop_assert!(chunks.iter().all(|c| !c.is_empty()));
        }
    }
}

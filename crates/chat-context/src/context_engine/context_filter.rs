//! Bounded context window: optional summary entry plus the recent tail.

use crate::memory::{ChatMessage, ChatRole};

/// Header that identifies the synthetic summary entry.
pub const SUMMARY_MARKER: &str = "CONVERSATION CONTEXT (Summary of earlier messages):";

pub fn summary_entry(summary: &str) -> ChatMessage {
    ChatMessage::system(format!("{}\n{}", SUMMARY_MARKER, summary))
}

pub fn is_summary_entry(message: &ChatMessage) -> bool {
    message.role == ChatRole::System && message.content.starts_with(SUMMARY_MARKER)
}

/// Returns at most `recent_count + 1` entries, order preserved.
pub fn filter(all_messages: &[ChatMessage], summary: Option<&str>, recent_count: usize) -> Vec<ChatMessage> {
    let start = all_messages.len().saturating_sub(recent_count);
    let recent = &all_messages[start..];

    let mut context = Vec::with_capacity(recent.len() + 1);
    if let Some(summary) = summary {
        context.push(summary_entry(summary));
    }
    context.extend_from_slice(recent);
    context
}

/// Drops every summary entry after the first one.
pub fn dedupe_summary_entries(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut seen = false;
    messages
        .into_iter()
        .filter(|m| {
            if !is_summary_entry(m) {
                return true;
            }
            let keep = !seen;
            seen = true;
            keep
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn history(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("user {}", i))
                } else {
                    ChatMessage::assistant(format!("bot {}", i))
                }
            })
            .collect()
    }

    #[test]
    fn test_short_history_passes_through() {
        let all = history(4);
        assert_eq!(filter(&all, None, 10), all);
    }

    #[test]
    fn test_summary_prepended_with_marker() {
        let all = history(12);
        let out = filter(&all, Some("The user likes jollof."), 10);

        assert_eq!(out.len(), 11);
        assert!(is_summary_entry(&out[0]));
        assert_eq!(
            out[0].content,
            "CONVERSATION CONTEXT (Summary of earlier messages):\nThe user likes jollof."
        );
        assert_eq!(out[1].content, "user 2");
        assert_eq!(out[10].content, "bot 11");
    }

    #[test]
    fn test_zero_recent_count_keeps_only_summary() {
        let out = filter(&history(3), Some("s"), 0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_user_text_resembling_marker_is_not_summary() {
        let msg = ChatMessage::user(format!("{} fake", SUMMARY_MARKER));
        assert!(!is_summary_entry(&msg));
    }

    #[test]
    fn test_dedupe_keeps_first_summary() {
        let messages = vec![
            summary_entry("first"),
            ChatMessage::user("hi"),
            summary_entry("second"),
            ChatMessage::system("You are helpful."),
        ];
        let out = dedupe_summary_entries(messages);
        assert_eq!(out.len(), 3);
        assert!(out[0].content.ends_with("first"));
        assert_eq!(out[2].content, "You are helpful.");
    }

    proptest! {
        #[test]
        fn prop_window_bound(n in 0usize..60, r in 0usize..20, with_summary in any::<bool>()) {
            let all = history(n);
            let summary = if with_summary { Some("s") } else { None };
            let out = filter(&all, summary, r);

            prop_assert!(out.len() <= r + 1);
            if with_summary && n > r {
                prop_assert_eq!(out.len(), r + 1);
            }
            // pure: same inputs give the same output
            prop_assert_eq!(out.clone(), filter(&all, summary, r));
            let tail = if with_summary { &out[1..] } else { &out[..] };
            prop_assert_eq!(tail, &all[n.saturating_sub(r)..]);
        }
    }
}

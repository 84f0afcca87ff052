//! Context compaction
//!
//! Keeps a conversation buffer bounded: once it grows past the threshold
//! the whole buffer, including the latest turn, is folded into one
//! system-role summary entry.

use crate::config::DEFAULT_COMPACTION_THRESHOLD;
use crate::memory::store::{ConversationBuffer, ConversationMessage};
use crate::memory::summarizer::{KeywordSummarizer, Summarizer};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Outcome of one compaction check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactionReport {
    pub performed: bool,
    pub before: usize,
    pub after: usize,
}

pub struct ContextCompactor {
    threshold: usize,
    summarizer: Box<dyn Summarizer>,
}

impl ContextCompactor {
    pub fn new(threshold: usize) -> Self {
        Self::with_summarizer(threshold, Box::new(KeywordSummarizer))
    }

    pub fn with_summarizer(threshold: usize, summarizer: Box<dyn Summarizer>) -> Self {
        Self {
            threshold,
            summarizer,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn should_compact(&self, buffer: &ConversationBuffer) -> bool {
        buffer.len() > self.threshold
    }

    /// If the buffer exceeds the threshold, replace it with one summary.
    pub fn compact_if_needed(&self, buffer: &mut ConversationBuffer) -> CompactionReport {
        let before = buffer.len();

        if !self.should_compact(buffer) {
            return CompactionReport {
                performed: false,
                before,
                after: before,
            };
        }

        let messages: Vec<ConversationMessage> = buffer.messages().cloned().collect();
        let summary = self.summarizer.summarize(&messages);
        buffer.replace_with(ConversationMessage::summary(summary));

        info!(
            summarizer = self.summarizer.name(),
            before,
            threshold = self.threshold,
            "Conversation buffer compacted"
        );

        CompactionReport {
            performed: true,
            before,
            after: buffer.len(),
        }
    }
}

impl Default for ContextCompactor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPACTION_THRESHOLD)
    }
}

/// Compact with the default keyword summarizer.
pub fn compact_if_needed(buffer: &mut ConversationBuffer, threshold: usize) -> CompactionReport {
    ContextCompactor::new(threshold).compact_if_needed(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::MessageRole;

    fn buffer_of(size: usize) -> ConversationBuffer {
        let mut buffer = ConversationBuffer::new();
        for i in 0..size {
            buffer.push(ConversationMessage::user(format!("pricing question {}", i)));
        }
        buffer
    }

    #[test]
    fn test_at_threshold_is_left_alone() {
        let mut buffer = buffer_of(40);
        let report = compact_if_needed(&mut buffer, 40);
        assert!(!report.performed);
        assert_eq!(buffer.len(), 40);
    }

    #[test]
    fn test_over_threshold_collapses_to_one_summary() {
        let mut buffer = buffer_of(41);
        let report = compact_if_needed(&mut buffer, 40);

        assert_eq!(report, CompactionReport { performed: true, before: 41, after: 1 });
        let only = buffer.last().unwrap();
        assert_eq!(only.role, MessageRole::System);
        assert!(only.is_summary);
        assert!(only.content.contains("Messages summarized: 41"));
    }

    #[test]
    fn test_latest_turn_is_folded_in() {
        let mut buffer = buffer_of(3);
        buffer.push(ConversationMessage::user("what about the fx exposure?"));
        compact_if_needed(&mut buffer, 3);
        assert!(buffer.last().unwrap().content.contains("Raised FX exposure"));
    }
}

//! Conversation summarization
//!
//! The default strategy is a keyword matcher: it looks only at user-authored
//! messages and emits one fixed bullet per topic it spots, plus the raw
//! message count. This is a lossy heuristic. It does not re-derive what was
//! said and should not be read as a faithful record of the conversation.

use crate::memory::store::{ConversationMessage, MessageRole};

pub const SUMMARY_HEADER: &str = "Conversation Summary:";

/// Pluggable compression strategy used by the compactor.
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &'static str;
    fn summarize(&self, messages: &[ConversationMessage]) -> String;
}

struct TopicRule {
    keywords: &'static [&'static str],
    bullet: &'static str,
}

const TOPICS: &[TopicRule] = &[
    TopicRule { keywords: &["feature"], bullet: "Discussed feature engineering" },
    TopicRule { keywords: &["model", "xgboost"], bullet: "Covered model choice and tuning" },
    TopicRule { keywords: &["debug", "error"], bullet: "Worked through errors and debugging" },
    TopicRule { keywords: &["metric", "score"], bullet: "Reviewed metrics and scores" },
    TopicRule { keywords: &["data", "dataset"], bullet: "Talked about data sources" },
    TopicRule { keywords: &["competition", "leaderboard", "competitor"], bullet: "Looked at the competitive landscape" },
    TopicRule { keywords: &["baseline"], bullet: "Referenced a baseline" },
    TopicRule { keywords: &["strategy", "plan"], bullet: "Outlined strategy or plans" },
    TopicRule { keywords: &["insight", "discussion"], bullet: "Shared insights" },
    TopicRule { keywords: &["price", "pricing"], bullet: "Asked about pricing" },
    TopicRule { keywords: &["fx", "currency", "exchange"], bullet: "Raised FX exposure" },
    TopicRule { keywords: &["margin"], bullet: "Checked margin targets" },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordSummarizer;

impl KeywordSummarizer {
    pub fn new() -> Self {
        Self
    }

    /// Bullets for every topic mentioned in a user message, in table order.
    pub fn matched_topics(&self, messages: &[ConversationMessage]) -> Vec<&'static str> {
        let user_text: Vec<String> = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.to_lowercase())
            .collect();

        TOPICS
            .iter()
            .filter(|topic| {
                user_text
                    .iter()
                    .any(|text| topic.keywords.iter().any(|kw| text.contains(kw)))
            })
            .map(|topic| topic.bullet)
            .collect()
    }
}

impl Summarizer for KeywordSummarizer {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn summarize(&self, messages: &[ConversationMessage]) -> String {
        let topics = self.matched_topics(messages);
        let user_count = messages.iter().filter(|m| m.role == MessageRole::User).count();

        let mut lines = vec![SUMMARY_HEADER.to_string()];
        if topics.is_empty() {
            lines.push("- No tracked topics mentioned".to_string());
        } else {
            lines.extend(topics.iter().map(|t| format!("- {}", t)));
        }
        lines.push(format!(
            "Messages summarized: {} ({} from user)",
            messages.len(),
            user_count
        ));

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_user_messages_are_scanned() {
        let messages = vec![
            ConversationMessage::user("What margin do we get on LaptopX?"),
            ConversationMessage::agent("The dataset shows a baseline of 20%"),
        ];

        let summary = KeywordSummarizer.summarize(&messages);
        assert!(summary.starts_with(SUMMARY_HEADER));
        assert!(summary.contains("Checked margin targets"));
        assert!(!summary.contains("data sources"));
        assert!(!summary.contains("baseline"));
        assert!(summary.contains("Messages summarized: 2 (1 from user)"));
    }

    #[test]
    fn test_no_topics_still_reports_count() {
        let messages = vec![ConversationMessage::user("hello")];
        let summary = KeywordSummarizer.summarize(&messages);
        assert!(summary.contains("No tracked topics"));
        assert!(summary.contains("Messages summarized: 1"));
    }

    #[test]
    fn test_topics_keep_table_order() {
        let messages = vec![ConversationMessage::user("fx risk on the price, and the strategy")];
        let topics = KeywordSummarizer.matched_topics(&messages);
        assert_eq!(
            topics,
            vec!["Outlined strategy or plans", "Asked about pricing", "Raised FX exposure"]
        );
    }
}

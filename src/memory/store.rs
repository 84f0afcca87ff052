//! Conversation buffer
//!
//! Ordered role/content/timestamp entries owned by a single session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Agent => "agent",
            MessageRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
    /// Approximate token count (4 chars per token)
    pub token_count: usize,
    pub is_summary: bool,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = (content.len() + 3) / 4;

        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content,
            token_count,
            is_summary: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Agent, content)
    }

    /// System-role entry holding a compaction summary.
    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            is_summary: true,
            ..Self::new(MessageRole::System, content)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationBuffer {
    messages: VecDeque<ConversationMessage>,
}

impl ConversationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push_back(message);
    }

    pub fn messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    /// The N most recent messages, newest first.
    pub fn recent_messages(&self, count: usize) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter().rev().take(count)
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.back()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.token_count).sum()
    }

    pub fn count_by_role(&self, role: MessageRole) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// Drop everything and keep `summary` as the sole entry.
    pub fn replace_with(&mut self, summary: ConversationMessage) {
        self.messages.clear();
        self.messages.push_back(summary);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn get_formatted_context(&self) -> String {
        let mut context = String::new();

        for msg in &self.messages {
            if msg.is_summary {
                context.push_str("[summary] ");
            }
            context.push_str(&format!(
                "{} ({}): {}\n",
                msg.role.as_str(),
                msg.timestamp.format("%H:%M:%S"),
                msg.content
            ));
        }

        context
    }
}

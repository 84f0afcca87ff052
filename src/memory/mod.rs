//! Memory: per-session conversation compaction and the cross-run store
//! of completed pricing runs.

pub mod context_manager;
pub mod service;
pub mod store;
pub mod summarizer;

pub use context_manager::{compact_if_needed, CompactionReport, ContextCompactor};
pub use service::{MemoryEntry, MemoryKey, MemoryMetrics, MemoryService, RunSnapshot};
pub use store::{ConversationBuffer, ConversationMessage, MessageRole};
pub use summarizer::{KeywordSummarizer, Summarizer};

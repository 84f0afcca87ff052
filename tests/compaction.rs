//! Conversation buffer compaction thresholds.

use fx_pricing_orchestrator::memory::{
    compact_if_needed, ConversationBuffer, ConversationMessage, MessageRole,
};

fn buffer_with(size: usize) -> ConversationBuffer {
    let mut buffer = ConversationBuffer::new();
    for i in 0..size {
        if i % 2 == 0 {
            buffer.push(ConversationMessage::user(format!("check the fx strategy for batch {}", i)));
        } else {
            buffer.push(ConversationMessage::agent(format!("recommended price for batch {}", i)));
        }
    }
    buffer
}

#[test]
fn test_compaction_past_threshold_then_noop() {
    let mut buffer = buffer_with(41);

    let first = compact_if_needed(&mut buffer, 40);
    assert!(first.performed);
    assert_eq!(first.before, 41);
    assert_eq!(first.after, 1);
    assert_eq!(buffer.len(), 1);

    let summary = buffer.last().unwrap().clone();
    assert_eq!(summary.role, MessageRole::System);
    assert!(summary.is_summary);

    let second = compact_if_needed(&mut buffer, 40);
    assert!(!second.performed);
    assert_eq!(second.before, 1);
    assert_eq!(second.after, 1);
    assert_eq!(buffer.last().unwrap(), &summary);
}

#[test]
fn test_buffer_at_threshold_is_left_alone() {
    let mut buffer = buffer_with(40);
    let report = compact_if_needed(&mut buffer, 40);

    assert!(!report.performed);
    assert_eq!(buffer.len(), 40);
}

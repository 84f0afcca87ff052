//! Long-lived pricing session
//!
//! Wraps the orchestrator for a caller that issues many requests in a row.
//! The session owns its conversation buffer and compacts it once it grows
//! past the configured threshold. Nothing here is shared across sessions
//! except the orchestrator (and through it, the memory service).

use crate::memory::{
    CompactionReport, ContextCompactor, ConversationBuffer, ConversationMessage, MessageRole,
};
use crate::models::PricingRequestConfig;
use crate::orchestrator::{PipelineResult, PricingOrchestrator};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Counters for one session since creation or the last reset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub queries: usize,
    pub errors: usize,
    pub avg_response_ms: f64,
    pub compactions: usize,
    pub buffer_len: usize,
    pub user_messages: usize,
    pub agent_messages: usize,
    pub system_messages: usize,
}

pub struct PricingSession {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    orchestrator: Arc<PricingOrchestrator>,
    buffer: ConversationBuffer,
    compactor: ContextCompactor,
    queries: usize,
    errors: usize,
    total_response_ms: f64,
    compactions: usize,
}

fn describe_request(request: &PricingRequestConfig) -> String {
    let mut text = format!(
        "Price {} in {}: {} units at {:.2} {}, reporting in {}",
        request.product_id,
        request.region,
        request.volume,
        request.unit_cost,
        request.purchase_currency,
        request.reporting_currency
    );
    if let Some(price) = request.current_price {
        text.push_str(&format!(", current price {:.2}", price));
    }
    if let Some(margin) = request.target_margin {
        text.push_str(&format!(", target margin {:.1}%", margin * 100.0));
    }
    if let Some(notes) = &request.manager_notes {
        text.push_str(&format!(". Notes: {}", notes));
    }
    text
}

impl PricingSession {
    pub fn new(orchestrator: Arc<PricingOrchestrator>, compaction_threshold: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            orchestrator,
            buffer: ConversationBuffer::new(),
            compactor: ContextCompactor::new(compaction_threshold),
            queries: 0,
            errors: 0,
            total_response_ms: 0.0,
            compactions: 0,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    /// Run one request through the orchestrator and log both sides of the
    /// exchange. Rejected requests are logged too before the error returns.
    pub async fn submit(&mut self, request: PricingRequestConfig) -> Result<PipelineResult> {
        self.buffer.push(ConversationMessage::user(describe_request(&request)));
        self.queries += 1;

        let start = Instant::now();
        let outcome = self.orchestrator.run(request).await;
        self.total_response_ms += start.elapsed().as_secs_f64() * 1000.0;

        let reply = match &outcome {
            Ok(result) => match &result.decision_brief_text {
                Some(brief) => brief.clone(),
                None => {
                    self.errors += 1;
                    format!(
                        "Run {} failed; missing inputs: {}",
                        result.run_id,
                        result.missing_inputs.join(", ")
                    )
                }
            },
            Err(e) => {
                self.errors += 1;
                warn!(session_id = %self.session_id, error = %e, "Request rejected");
                format!("Request rejected: {}", e)
            }
        };
        self.buffer.push(ConversationMessage::agent(reply));
        self.compact();

        outcome
    }

    /// Log a free-text user turn without running the pipeline.
    pub fn add_user_message(&mut self, content: impl Into<String>) -> CompactionReport {
        self.buffer.push(ConversationMessage::user(content));
        self.compact()
    }

    fn compact(&mut self) -> CompactionReport {
        let report = self.compactor.compact_if_needed(&mut self.buffer);
        if report.performed {
            self.compactions += 1;
        }
        report
    }

    /// Messages containing `keyword`, case-insensitive, oldest first.
    pub fn search(&self, keyword: &str) -> Vec<ConversationMessage> {
        let needle = keyword.to_lowercase();
        self.buffer
            .messages()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id,
            started_at: self.started_at,
            queries: self.queries,
            errors: self.errors,
            avg_response_ms: if self.queries == 0 {
                0.0
            } else {
                self.total_response_ms / self.queries as f64
            },
            compactions: self.compactions,
            buffer_len: self.buffer.len(),
            user_messages: self.buffer.count_by_role(MessageRole::User),
            agent_messages: self.buffer.count_by_role(MessageRole::Agent),
            system_messages: self.buffer.count_by_role(MessageRole::System),
        }
    }

    pub fn export_history(&self) -> String {
        let mut out = format!(
            "Session {} (started {})\n",
            self.session_id,
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        for msg in self.buffer.messages() {
            out.push_str(&format!(
                "[{}] {}{}: {}\n",
                msg.timestamp.format("%Y-%m-%d %H:%M:%S"),
                msg.role.as_str().to_uppercase(),
                if msg.is_summary { " (summary)" } else { "" },
                msg.content
            ));
        }
        out
    }

    /// Clear the buffer and counters, returning the stats from before.
    pub fn reset(&mut self) -> SessionStats {
        let previous = self.stats();

        self.buffer.clear();
        self.queries = 0;
        self.errors = 0;
        self.total_response_ms = 0.0;
        self.compactions = 0;
        self.started_at = Utc::now();

        info!(session_id = %self.session_id, queries = previous.queries, "Session reset");
        previous
    }
}

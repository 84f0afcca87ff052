//! Observability collector
//!
//! Wraps every model, tool and agent invocation in a scoped timer and keeps
//! the raw events in an append-only log. Each event carries its run id, so
//! a collector shared across a batch can still report per-run views.

use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ModelCall,
    ToolCall,
    AgentCall,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ModelCall => "model_call",
            EventKind::ToolCall => "tool_call",
            EventKind::AgentCall => "agent_call",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEvent {
    pub event_id: Uuid,
    pub run_id: Uuid,
    pub kind: EventKind,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub outcome: Outcome,
    #[serde(default)]
    pub error: Option<String>,
}

/// Counts and latency statistics over a set of events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObservabilitySummary {
    pub model_calls: usize,
    pub tool_calls: usize,
    pub agent_calls: usize,
    pub event_count: usize,
    pub error_count: usize,
    pub total_duration_ms: f64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
    pub duration_by_kind_ms: BTreeMap<String, f64>,
    pub last_error: Option<String>,
}

impl ObservabilitySummary {
    pub fn from_events(events: &[CallEvent]) -> Self {
        let mut summary = Self::default();

        for event in events {
            match event.kind {
                EventKind::ModelCall => summary.model_calls += 1,
                EventKind::ToolCall => summary.tool_calls += 1,
                EventKind::AgentCall => summary.agent_calls += 1,
            }
            if event.outcome != Outcome::Success {
                summary.error_count += 1;
                if let Some(err) = &event.error {
                    summary.last_error = Some(format!("{}: {}", event.name, err));
                }
            }
            summary.total_duration_ms += event.duration_ms;
            summary.max_duration_ms = summary.max_duration_ms.max(event.duration_ms);
            *summary
                .duration_by_kind_ms
                .entry(event.kind.as_str().to_string())
                .or_insert(0.0) += event.duration_ms;
        }

        summary.event_count = events.len();
        if !events.is_empty() {
            summary.avg_duration_ms = summary.total_duration_ms / events.len() as f64;
        }
        summary
    }
}

/// Shared, cloneable event sink.
#[derive(Clone, Default)]
pub struct ObservabilityCollector {
    events: Arc<RwLock<Vec<CallEvent>>>,
}

impl ObservabilityCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: CallEvent) {
        debug!(
            run_id = %event.run_id,
            kind = event.kind.as_str(),
            name = %event.name,
            duration_ms = event.duration_ms,
            outcome = ?event.outcome,
            "call recorded"
        );
        self.events.write().await.push(event);
    }

    /// Time `fut` and record its outcome.
    pub async fn observe<T, F>(&self, run_id: Uuid, kind: EventKind, name: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.observe_with_timeout(run_id, kind, name, None, fut).await
    }

    /// Like `observe`, but abandons `fut` after `timeout`.
    ///
    /// A timed-out call is still recorded, with outcome `timeout`.
    pub async fn observe_with_timeout<T, F>(
        &self,
        run_id: Uuid,
        kind: EventKind,
        name: &str,
        timeout: Option<Duration>,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started_at = Utc::now();
        let start = Instant::now();

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(OrchestrationError::StepTimeout {
                    step: name.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => fut.await,
        };

        let (outcome, error) = match &result {
            Ok(_) => (Outcome::Success, None),
            Err(err @ OrchestrationError::StepTimeout { .. }) => {
                warn!(run_id = %run_id, name = %name, "call timed out");
                (Outcome::Timeout, Some(err.to_string()))
            }
            Err(err) => (Outcome::Error, Some(err.to_string())),
        };

        self.record(CallEvent {
            event_id: Uuid::new_v4(),
            run_id,
            kind,
            name: name.to_string(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            outcome,
            error,
        })
        .await;

        result
    }

    /// Full ordered event log.
    pub async fn detailed(&self) -> Vec<CallEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for_run(&self, run_id: Uuid) -> Vec<CallEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    pub async fn last_events(&self, count: usize) -> Vec<CallEvent> {
        let events = self.events.read().await;
        let skip = events.len().saturating_sub(count);
        events[skip..].to_vec()
    }

    /// Cumulative summary across every run recorded so far.
    pub async fn summary(&self) -> ObservabilitySummary {
        ObservabilitySummary::from_events(&self.events.read().await)
    }

    pub async fn summary_for_run(&self, run_id: Uuid) -> ObservabilitySummary {
        ObservabilitySummary::from_events(&self.events_for_run(run_id).await)
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clear the log, returning how many events were dropped.
    pub async fn reset(&self) -> usize {
        let mut events = self.events.write().await;
        let dropped = events.len();
        events.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_observe_records_success_and_error() {
        let collector = ObservabilityCollector::new();
        let run_id = Uuid::new_v4();

        let ok: Result<u32> = collector
            .observe(run_id, EventKind::ToolCall, "calc", async { Ok(7) })
            .await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32> = collector
            .observe(run_id, EventKind::ModelCall, "llm", async {
                Err(OrchestrationError::LlmError("boom".to_string()))
            })
            .await;
        assert!(err.is_err());

        let summary = collector.summary_for_run(run_id).await;
        assert_eq!(summary.event_count, 2);
        assert_eq!(summary.tool_calls, 1);
        assert_eq!(summary.model_calls, 1);
        assert_eq!(summary.error_count, 1);
        assert!(summary.last_error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_failed_event() {
        let collector = ObservabilityCollector::new();
        let run_id = Uuid::new_v4();

        let result: Result<()> = collector
            .observe_with_timeout(
                run_id,
                EventKind::AgentCall,
                "slow_step",
                Some(Duration::from_millis(10)),
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
            )
            .await;

        assert!(matches!(result, Err(OrchestrationError::StepTimeout { .. })));
        let events = collector.detailed().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, Outcome::Timeout);
    }

    #[tokio::test]
    async fn test_shared_collector_is_cumulative_until_reset() {
        let collector = ObservabilityCollector::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        for run in [first, second] {
            let _: Result<()> = collector
                .observe(run, EventKind::AgentCall, "step", async { Ok(()) })
                .await;
        }

        assert_eq!(collector.summary().await.event_count, 2);
        assert_eq!(collector.summary_for_run(first).await.event_count, 1);
        assert_eq!(collector.last_events(1).await[0].run_id, second);

        assert_eq!(collector.reset().await, 2);
        assert_eq!(collector.event_count().await, 0);
    }

    #[test]
    fn test_empty_summary_is_zeroed() {
        let summary = ObservabilitySummary::from_events(&[]);
        assert_eq!(summary.event_count, 0);
        assert_eq!(summary.avg_duration_ms, 0.0);
    }
}

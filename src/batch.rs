//! Batch execution and regression checks
//!
//! Runs many independent requests against one orchestrator with a bounded
//! number in flight. Each run gets its own context and conversation state;
//! the memory service and an optional shared collector are the only things
//! runs have in common.

use crate::config::{AppConfig, MAX_BATCH_CONCURRENCY};
use crate::error::OrchestrationError;
use crate::evaluation::BRIEF_MIN_CHARS;
use crate::models::PricingRequestConfig;
use crate::observability::ObservabilityCollector;
use crate::orchestrator::{PipelineResult, PricingOrchestrator, RunStatus};
use crate::state::PipelineState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub const ISSUE_RUN_FAILED: &str = "run_failed";
pub const ISSUE_REQUEST_REJECTED: &str = "request_rejected";
pub const ISSUE_SUMMARY_NOT_JSON: &str = "structured_summary_not_json";
pub const ISSUE_EVALUATION_NOT_JSON: &str = "evaluation_not_json";
pub const ISSUE_BRIEF_TOO_SHORT: &str = "brief_too_short";
pub const ISSUE_NO_EVENTS: &str = "no_events_recorded";

/// Outcome of one request in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub product_id: String,
    pub region: String,
    pub status: Option<RunStatus>,
    pub final_state: Option<PipelineState>,
    pub duration_ms: f64,
    pub event_count: usize,
    pub model_calls: usize,
    pub tool_calls: usize,
    pub agent_calls: usize,
    pub evaluation_score: Option<f64>,
    pub recommended_price: Option<f64>,
    pub issues: Vec<String>,
    pub error: Option<String>,
}

impl BatchItemResult {
    fn from_outcome(
        index: usize,
        request: &PricingRequestConfig,
        duration_ms: f64,
        outcome: &crate::Result<PipelineResult>,
    ) -> Self {
        let mut item = Self {
            index,
            product_id: request.product_id.clone(),
            region: request.region.clone(),
            status: None,
            final_state: None,
            duration_ms,
            event_count: 0,
            model_calls: 0,
            tool_calls: 0,
            agent_calls: 0,
            evaluation_score: None,
            recommended_price: None,
            issues: vec![],
            error: None,
        };

        match outcome {
            Ok(result) => {
                let summary = &result.observability_summary;
                item.status = Some(result.status);
                item.final_state = Some(result.final_state);
                item.event_count = summary.event_count;
                item.model_calls = summary.model_calls;
                item.tool_calls = summary.tool_calls;
                item.agent_calls = summary.agent_calls;
                item.evaluation_score = result.evaluation().map(|e| e.overall_score);
                item.recommended_price = result
                    .memory_entry
                    .as_ref()
                    .and_then(|e| e.recommended_price());
                item.issues = check_pipeline_output(result);
            }
            Err(e) => {
                item.issues = vec![ISSUE_REQUEST_REJECTED.to_string()];
                item.error = Some(e.to_string());
            }
        }

        item
    }

    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub rejected: usize,
    pub avg_duration_ms: f64,
    pub avg_event_count: f64,
    pub avg_model_calls: f64,
    pub avg_tool_calls: f64,
    pub avg_agent_calls: f64,
    pub avg_evaluation_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegressionReport {
    pub total: usize,
    pub passed: usize,
    pub pass_rate: f64,
    /// How many items raised each issue.
    pub issue_counts: BTreeMap<String, usize>,
}

pub struct BatchRunner {
    orchestrator: Arc<PricingOrchestrator>,
    concurrency: usize,
    shared_collector: Option<ObservabilityCollector>,
}

impl BatchRunner {
    /// `concurrency` is clamped to `1..=MAX_BATCH_CONCURRENCY`.
    pub fn new(orchestrator: Arc<PricingOrchestrator>, concurrency: usize) -> Self {
        Self {
            orchestrator,
            concurrency: concurrency.clamp(1, MAX_BATCH_CONCURRENCY),
            shared_collector: None,
        }
    }

    pub fn from_config(orchestrator: Arc<PricingOrchestrator>, config: &AppConfig) -> Self {
        Self::new(orchestrator, config.batch_concurrency)
    }

    /// Record every run into one collector so totals accumulate across the
    /// batch. Per-run views are still filtered by run id.
    pub fn with_shared_collector(mut self, collector: ObservabilityCollector) -> Self {
        self.shared_collector = Some(collector);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every request. Results come back in input order.
    pub async fn run(&self, requests: Vec<PricingRequestConfig>) -> Vec<BatchItemResult> {
        let total = requests.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        info!(total, concurrency = self.concurrency, "Batch started");
        let batch_start = Instant::now();

        for (index, request) in requests.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&self.orchestrator);
            let collector = self.shared_collector.clone().unwrap_or_default();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let outcome = Err(OrchestrationError::ConfigError(
                            "batch worker pool closed".to_string(),
                        ));
                        return BatchItemResult::from_outcome(index, &request, 0.0, &outcome);
                    }
                };

                let start = Instant::now();
                let outcome = orchestrator
                    .run_with_collector(request.clone(), &collector)
                    .await;
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                BatchItemResult::from_outcome(index, &request, duration_ms, &outcome)
            });
        }

        let mut items = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => {
                    if let Some(err) = &item.error {
                        warn!(index = item.index, product = %item.product_id, error = %err, "Batch item rejected");
                    }
                    items.push(item);
                }
                Err(e) => error!(error = %e, "Batch worker aborted"),
            }
        }
        items.sort_by_key(|item| item.index);

        info!(
            total,
            finished = items.len(),
            elapsed_ms = batch_start.elapsed().as_millis() as u64,
            "Batch finished"
        );
        items
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Averages across a finished batch. An empty batch is all zeros.
pub fn summarize(items: &[BatchItemResult]) -> BatchSummary {
    let count = |status: RunStatus| items.iter().filter(|i| i.status == Some(status)).count();
    let avg = |f: fn(&BatchItemResult) -> f64| mean_of(items.iter().map(f)).unwrap_or(0.0);

    BatchSummary {
        total: items.len(),
        completed: count(RunStatus::Completed),
        failed: count(RunStatus::Failed),
        rejected: items.iter().filter(|i| i.status.is_none()).count(),
        avg_duration_ms: avg(|i| i.duration_ms),
        avg_event_count: avg(|i| i.event_count as f64),
        avg_model_calls: avg(|i| i.model_calls as f64),
        avg_tool_calls: avg(|i| i.tool_calls as f64),
        avg_agent_calls: avg(|i| i.agent_calls as f64),
        avg_evaluation_score: mean_of(items.iter().filter_map(|i| i.evaluation_score)),
    }
}

/// Health checks on one run's artifacts. Empty means healthy.
pub fn check_pipeline_output(result: &PipelineResult) -> Vec<String> {
    let mut issues = Vec::new();

    if result.status != RunStatus::Completed {
        issues.push(ISSUE_RUN_FAILED.to_string());
    }

    let parses = |json: &Option<String>| {
        json.as_deref()
            .map(|s| serde_json::from_str::<Value>(s).is_ok())
            .unwrap_or(false)
    };
    if !parses(&result.structured_summary_json) {
        issues.push(ISSUE_SUMMARY_NOT_JSON.to_string());
    }
    if !parses(&result.evaluation_json) {
        issues.push(ISSUE_EVALUATION_NOT_JSON.to_string());
    }

    let brief_chars = result
        .decision_brief_text
        .as_deref()
        .map(|b| b.chars().count())
        .unwrap_or(0);
    if brief_chars < BRIEF_MIN_CHARS {
        issues.push(ISSUE_BRIEF_TOO_SHORT.to_string());
    }

    if result.observability_summary.event_count == 0 {
        issues.push(ISSUE_NO_EVENTS.to_string());
    }

    issues
}

pub fn summarize_regression(items: &[BatchItemResult]) -> RegressionReport {
    let mut issue_counts = BTreeMap::new();
    for item in items {
        for issue in &item.issues {
            *issue_counts.entry(issue.clone()).or_insert(0) += 1;
        }
    }

    let passed = items.iter().filter(|i| i.passed()).count();
    RegressionReport {
        total: items.len(),
        passed,
        pass_rate: if items.is_empty() {
            0.0
        } else {
            passed as f64 / items.len() as f64
        },
        issue_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portfolio() -> Vec<PricingRequestConfig> {
        vec![
            PricingRequestConfig::new("LaptopX", "EU", "CNY", "EUR", 1000, 3000.0)
                .with_current_price(1200.0),
            PricingRequestConfig::new("TabletY", "US", "CNY", "USD", 500, 900.0),
            PricingRequestConfig::new("PhoneZ", "UK", "USD", "GBP", 0, 200.0),
            PricingRequestConfig::new("MonitorQ", "JP", "CNY", "JPY", 250, 1500.0),
        ]
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let orchestrator = Arc::new(PricingOrchestrator::local());
        assert_eq!(BatchRunner::new(Arc::clone(&orchestrator), 0).concurrency(), 1);
        assert_eq!(BatchRunner::new(orchestrator, 500).concurrency(), MAX_BATCH_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order_and_isolates_rejections() {
        let runner = BatchRunner::new(Arc::new(PricingOrchestrator::local()), 2);
        let items = runner.run(portfolio()).await;

        assert_eq!(items.len(), 4);
        assert!(items.iter().enumerate().all(|(i, item)| item.index == i));
        assert!(items[2].error.is_some());
        assert_eq!(items[2].issues, vec![ISSUE_REQUEST_REJECTED.to_string()]);

        let summary = summarize(&items);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.rejected, 1);
        assert!(summary.avg_event_count > 0.0);

        let regression = summarize_regression(&items);
        assert_eq!(regression.passed, 3);
        assert_eq!(regression.issue_counts[ISSUE_REQUEST_REJECTED], 1);
    }

    #[tokio::test]
    async fn test_shared_collector_accumulates() {
        let collector = ObservabilityCollector::new();
        let runner = BatchRunner::new(Arc::new(PricingOrchestrator::local()), 4)
            .with_shared_collector(collector.clone());

        let items = runner.run(portfolio()).await;
        let per_run: usize = items.iter().map(|i| i.event_count).sum();
        assert_eq!(collector.event_count().await, per_run);
    }

    #[test]
    fn test_empty_batch_summaries() {
        assert_eq!(summarize(&[]), BatchSummary::default());
        assert_eq!(summarize_regression(&[]).pass_rate, 0.0);
    }
}

//! Execution engine for specialist steps
//!
//! Runs exactly one specialist per call: hard dependency check, timed and
//! observed invocation, payload shape check. It never retries.

use crate::error::OrchestrationError;
use crate::models::{ExecutionStatus, StepOutput};
use crate::observability::EventKind;
use crate::steps::{Specialist, StepContext};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What happened to one step of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepReport {
    pub step: String,
    pub status: ExecutionStatus,
    pub duration_ms: f64,
    #[serde(default)]
    pub missing_dependencies: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionEngine {
    step_timeout: Option<Duration>,
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout
    }

    /// Run one step against the context. The output, if any, is returned
    /// rather than recorded so the caller decides what enters the context.
    pub async fn run_step(
        &self,
        specialist: &dyn Specialist,
        ctx: &StepContext,
    ) -> (StepReport, Option<StepOutput>) {
        let step = specialist.name();

        // -------------------------------------------------
        // HARD DEPENDENCY VALIDATION
        // -------------------------------------------------
        let missing_dependencies: Vec<String> = specialist
            .dependencies()
            .iter()
            .filter(|dep| !ctx.has_output(dep))
            .map(|dep| dep.to_string())
            .collect();

        if !missing_dependencies.is_empty() {
            warn!(
                run_id = %ctx.run_id,
                step,
                ?missing_dependencies,
                "Skipping step due to unmet dependencies"
            );

            return (
                StepReport {
                    step: step.to_string(),
                    status: ExecutionStatus::Skipped,
                    duration_ms: 0.0,
                    error: Some(format!("unmet dependencies: {}", missing_dependencies.join(", "))),
                    missing_dependencies,
                },
                None,
            );
        }

        // -------------------------------------------------
        // OBSERVED INVOCATION
        // -------------------------------------------------
        let start = Instant::now();
        let result = ctx
            .collector()
            .observe_with_timeout(
                ctx.run_id,
                EventKind::AgentCall,
                step,
                self.step_timeout,
                specialist.invoke(ctx),
            )
            .await
            .and_then(|output| {
                if output.payload.is_object() {
                    Ok(output)
                } else {
                    Err(OrchestrationError::StepFailure {
                        step: step.to_string(),
                        message: "payload is not a JSON object".to_string(),
                    })
                }
            })
            .map_err(|e| e.into_step_failure(step));
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(output) => {
                debug!(run_id = %ctx.run_id, step, duration_ms, "Step succeeded");
                (
                    StepReport {
                        step: step.to_string(),
                        status: ExecutionStatus::Success,
                        duration_ms,
                        missing_dependencies: vec![],
                        error: None,
                    },
                    Some(output),
                )
            }
            Err(e) => {
                warn!(run_id = %ctx.run_id, step, error = %e, "Step failed");
                (
                    StepReport {
                        step: step.to_string(),
                        status: ExecutionStatus::Failed,
                        duration_ms,
                        missing_dependencies: vec![],
                        error: Some(e.to_string()),
                    },
                    None,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::SyntheticFxProvider;
    use crate::models::PricingRequestConfig;
    use crate::observability::{ObservabilityCollector, Outcome};
    use crate::steps::{FxImpactStep, MarketResearchStep};
    use crate::tools::create_default_registry;
    use crate::Result;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    struct ScalarStep;

    #[async_trait::async_trait]
    impl Specialist for ScalarStep {
        fn name(&self) -> &'static str {
            "scalar"
        }

        async fn invoke(&self, _ctx: &StepContext) -> Result<StepOutput> {
            Ok(StepOutput::new("n", json!(42)))
        }
    }

    struct SlowStep;

    #[async_trait::async_trait]
    impl Specialist for SlowStep {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn invoke(&self, _ctx: &StepContext) -> Result<StepOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StepOutput::new("late", json!({})))
        }
    }

    fn context() -> StepContext {
        StepContext::new(
            Uuid::new_v4(),
            Arc::new(PricingRequestConfig::new("LaptopX", "EU", "CNY", "EUR", 1000, 3000.0)),
            Arc::new(create_default_registry(Arc::new(SyntheticFxProvider))),
            ObservabilityCollector::new(),
        )
    }

    #[tokio::test]
    async fn test_success_is_observed_as_agent_call() {
        let ctx = context();
        let (report, output) = ExecutionEngine::new().run_step(&MarketResearchStep, &ctx).await;

        assert_eq!(report.status, ExecutionStatus::Success);
        assert!(output.is_some());
        let summary = ctx.collector().summary_for_run(ctx.run_id).await;
        assert_eq!(summary.agent_calls, 1);
        assert_eq!(summary.tool_calls, 1);
    }

    #[tokio::test]
    async fn test_unmet_dependency_skips_without_invoking() {
        let ctx = context();
        let (report, output) = ExecutionEngine::new().run_step(&FxImpactStep, &ctx).await;

        assert_eq!(report.status, ExecutionStatus::Skipped);
        assert_eq!(report.missing_dependencies, vec!["fx_snapshot".to_string()]);
        assert!(output.is_none());
        assert_eq!(ctx.collector().event_count().await, 0);
    }

    #[tokio::test]
    async fn test_non_object_payload_fails() {
        let ctx = context();
        let (report, output) = ExecutionEngine::new().run_step(&ScalarStep, &ctx).await;
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert!(report.error.unwrap().contains("not a JSON object"));
        assert!(output.is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_failed_and_recorded() {
        let ctx = context();
        let engine = ExecutionEngine::new().with_step_timeout(Some(Duration::from_millis(20)));
        let (report, _) = engine.run_step(&SlowStep, &ctx).await;

        assert_eq!(report.status, ExecutionStatus::Failed);
        let events = ctx.collector().detailed().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, Outcome::Timeout);
    }
}

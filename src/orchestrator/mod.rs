//! Pricing orchestrator - drives the fixed step sequence
//!
//! INIT → MARKET_RESEARCH → COMPETITIVE_PRICING → FX_SNAPSHOT → FX_IMPACT
//! → MARGIN_PLANNING → DECISION_BRIEF → EVALUATION → DONE | FAILED

use crate::config::AppConfig;
use crate::execution::{ExecutionEngine, StepReport};
use crate::fx::{provider_from_config, FxProvider, SyntheticFxProvider};
use crate::memory::{MemoryEntry, MemoryService, RunSnapshot};
use crate::models::{EvaluationResult, ExecutionStatus, PricingRequestConfig, StepOutput};
use crate::observability::{CallEvent, ObservabilityCollector, ObservabilitySummary};
use crate::state::{PipelineState, StateMachine};
use crate::steps::local::FxRiskAssessment;
use crate::steps::{
    specialists_from_config, Specialist, SpecialistSet, StepContext, COMPETITIVE_PRICING,
    DECISION_BRIEF, EVALUATION, FX_IMPACT, MANDATORY_STEPS, MARGIN_SCENARIOS, MARKET_RESEARCH,
};
use crate::tools::seed::fingerprint;
use crate::tools::{create_default_registry, ToolRegistry};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Everything a caller gets back from one run, completed or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub request_fingerprint: String,
    pub status: RunStatus,
    pub final_state: PipelineState,
    pub state_history: Vec<PipelineState>,
    /// Absent on failed runs.
    pub decision_brief_text: Option<String>,
    pub structured_summary_json: Option<String>,
    pub evaluation_json: Option<String>,
    pub step_outputs: BTreeMap<String, StepOutput>,
    pub step_reports: Vec<StepReport>,
    pub missing_inputs: Vec<String>,
    pub observability_summary: ObservabilitySummary,
    pub observability_detailed: Vec<CallEvent>,
    /// Latest entry for the same product/region before this run started.
    pub prior_memory_entry: Option<MemoryEntry>,
    /// Entry appended by this run.
    pub memory_entry: Option<MemoryEntry>,
}

impl PipelineResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn evaluation(&self) -> Option<EvaluationResult> {
        self.evaluation_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

/// Sequencer over a fixed specialist set.
pub struct PricingOrchestrator {
    specialists: SpecialistSet,
    tools: Arc<ToolRegistry>,
    execution_engine: ExecutionEngine,
    memory: Option<MemoryService>,
}

impl PricingOrchestrator {
    pub fn new(
        specialists: SpecialistSet,
        tools: Arc<ToolRegistry>,
        execution_engine: ExecutionEngine,
        memory: Option<MemoryService>,
    ) -> Self {
        Self {
            specialists,
            tools,
            execution_engine,
            memory,
        }
    }

    /// Local specialists, synthetic FX and a fresh in-process memory.
    pub fn local() -> Self {
        Self::with_fx_provider(Arc::new(SyntheticFxProvider))
    }

    pub fn with_fx_provider(fx_provider: Arc<dyn FxProvider>) -> Self {
        Self::new(
            SpecialistSet::local(),
            Arc::new(create_default_registry(fx_provider)),
            ExecutionEngine::new(),
            Some(MemoryService::new()),
        )
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let fx_provider = provider_from_config(config)?;
        let specialists = specialists_from_config(config)?;

        info!(
            fx_provider = ?config.fx_provider,
            step_backend = ?config.step_backend,
            steps = specialists.names().len(),
            "Pricing orchestrator configured"
        );

        Ok(Self::new(
            specialists,
            Arc::new(create_default_registry(fx_provider)),
            ExecutionEngine::new().with_step_timeout(config.step_timeout),
            Some(MemoryService::new()),
        ))
    }

    pub fn with_memory(mut self, memory: Option<MemoryService>) -> Self {
        self.memory = memory;
        self
    }

    /// Swap one step implementation, keyed by its name.
    pub fn with_specialist(mut self, specialist: Arc<dyn Specialist>) -> Self {
        self.specialists.replace(specialist);
        self
    }

    pub fn memory(&self) -> Option<&MemoryService> {
        self.memory.as_ref()
    }

    pub fn specialists(&self) -> &SpecialistSet {
        &self.specialists
    }

    /// Run once with a collector scoped to this run.
    pub async fn run(&self, request: PricingRequestConfig) -> Result<PipelineResult> {
        self.run_with_collector(request, &ObservabilityCollector::new())
            .await
    }

    /// Run once, recording events into `collector`. The returned
    /// observability views are filtered to this run's id.
    pub async fn run_with_collector(
        &self,
        request: PricingRequestConfig,
        collector: &ObservabilityCollector,
    ) -> Result<PipelineResult> {
        request.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let request_fingerprint = fingerprint(&request);

        info!(
            run_id = %run_id,
            product = %request.product_id,
            region = %request.region,
            user_id = %request.user_id,
            "Pricing run started"
        );

        let prior_memory = match &self.memory {
            Some(memory) => memory.latest(&request.product_id, &request.region).await,
            None => None,
        };
        if let Some(prior) = &prior_memory {
            debug!(run_id = %run_id, prior_run = %prior.run_id, "Prior memory entry found");
        }

        let request = Arc::new(request);
        let mut ctx = StepContext::new(
            run_id,
            Arc::clone(&request),
            Arc::clone(&self.tools),
            collector.clone(),
        )
        .with_prior_memory(prior_memory.clone());

        let mut machine = StateMachine::new();
        let mut step_reports = Vec::new();
        let mut missing_inputs: Vec<String> = Vec::new();

        while let Some(state) = machine.current().next() {
            machine.transition_to(state)?;
            let Some(step) = state.step_name() else {
                continue;
            };

            let (report, output) = match self.specialists.for_state(state) {
                Some(specialist) => {
                    self.execution_engine
                        .run_step(specialist.as_ref(), &ctx)
                        .await
                }
                None => (
                    StepReport {
                        step: step.to_string(),
                        status: ExecutionStatus::Failed,
                        duration_ms: 0.0,
                        missing_dependencies: vec![],
                        error: Some("no specialist configured".to_string()),
                    },
                    None,
                ),
            };

            let unmet = report.missing_dependencies.clone();
            step_reports.push(report);

            if let Some(output) = output {
                ctx.record(step, output)?;
                continue;
            }

            // -------------------------------------------------
            // MANDATORY STEP VALIDATION
            // -------------------------------------------------
            if MANDATORY_STEPS.contains(&step) {
                if unmet.is_empty() {
                    push_unique(&mut missing_inputs, step);
                } else {
                    for dep in &unmet {
                        push_unique(&mut missing_inputs, dep);
                    }
                }

                warn!(
                    run_id = %run_id,
                    step,
                    ?missing_inputs,
                    "Mandatory step could not complete - run failed"
                );
                machine.fail()?;
                break;
            }

            push_unique(&mut missing_inputs, step);
            debug!(run_id = %run_id, step, "Continuing with step output marked missing");
        }

        let final_state = machine.current();
        let status = if final_state == PipelineState::Done {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        let mut decision_brief_text = None;
        let mut structured_summary_json = None;
        let mut evaluation_json = None;
        let mut memory_entry = None;

        if status == RunStatus::Completed {
            let structured_summary = ctx
                .payload(DECISION_BRIEF)
                .and_then(|p| p.get("structured_summary"))
                .cloned()
                .unwrap_or(Value::Null);

            decision_brief_text = ctx.output(DECISION_BRIEF).map(|o| o.narrative.clone());
            structured_summary_json = Some(serde_json::to_string(&structured_summary)?);
            evaluation_json = ctx
                .payload(EVALUATION)
                .map(serde_json::to_string)
                .transpose()?;

            if let Some(memory) = &self.memory {
                let entry = build_memory_entry(&ctx, &request, &request_fingerprint, structured_summary);
                let stored = memory.append(entry).await?;
                memory_entry = Some(stored.as_ref().clone());
            }
        }

        let observability_detailed = collector.events_for_run(run_id).await;
        let observability_summary = ObservabilitySummary::from_events(&observability_detailed);

        info!(
            run_id = %run_id,
            status = ?status,
            final_state = %final_state,
            events = observability_summary.event_count,
            missing = missing_inputs.len(),
            "Pricing run finished"
        );

        Ok(PipelineResult {
            run_id,
            started_at,
            finished_at: Utc::now(),
            request_fingerprint,
            status,
            final_state,
            state_history: machine.history().to_vec(),
            decision_brief_text,
            structured_summary_json,
            evaluation_json,
            step_outputs: ctx.outputs().clone(),
            step_reports,
            missing_inputs,
            observability_summary,
            observability_detailed,
            prior_memory_entry: prior_memory.map(|e| e.as_ref().clone()),
            memory_entry,
        })
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

fn build_memory_entry(
    ctx: &StepContext,
    request: &PricingRequestConfig,
    request_fingerprint: &str,
    structured_summary: Value,
) -> MemoryEntry {
    let fx_risk = ctx
        .payload_field::<FxRiskAssessment>(MARGIN_SCENARIOS, "fx_risk")
        .map(|r| r.level);

    let snapshot = RunSnapshot {
        product: ctx.payload_field(MARKET_RESEARCH, "product_snapshot"),
        competitors: ctx.payload_field(COMPETITIVE_PRICING, "competitor_snapshot"),
        fx_scenarios: ctx.payload_field(FX_IMPACT, "fx_scenarios"),
        margin_scenarios: ctx.payload_field(MARGIN_SCENARIOS, "margin_scenarios"),
        recommendation: ctx.payload_field(MARGIN_SCENARIOS, "recommendation"),
        fx_risk,
        structured_summary,
        evaluation: ctx
            .payload(EVALUATION)
            .and_then(|p| serde_json::from_value(p.clone()).ok()),
    };

    let mut tags = vec![request.category.clone(), request.reporting_currency.to_lowercase()];
    if let Some(level) = fx_risk {
        tags.push(format!("fx_risk:{}", level.as_str().to_lowercase()));
    }
    if let Some(rec) = &snapshot.recommendation {
        tags.push(format!("price:{}", rec.price_source));
    }

    MemoryEntry {
        entry_id: Uuid::new_v4(),
        run_id: ctx.run_id,
        product: request.product_id.clone(),
        region: request.region.clone(),
        reporting_currency: request.reporting_currency.clone(),
        timestamp: Utc::now(),
        tags,
        request_fingerprint: request_fingerprint.to_string(),
        target_margin: request.effective_target_margin(),
        manager_notes: request.manager_notes.clone(),
        snapshot,
    }
}

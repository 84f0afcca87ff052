//! Specialist steps
//!
//! A specialist receives the run context and returns narrative text plus a
//! JSON payload. The engine only sees this trait; whether a step is computed
//! locally, written by an LLM or answered by a remote agent is decided when
//! the `SpecialistSet` is built.

pub mod llm;
pub mod local;
pub mod remote;

use crate::config::{AppConfig, StepBackend};
use crate::error::OrchestrationError;
use crate::gemini::GeminiClient;
use crate::memory::MemoryEntry;
use crate::models::{PricingRequestConfig, StepOutput};
use crate::observability::{EventKind, ObservabilityCollector};
use crate::state::PipelineState;
use crate::tools::ToolRegistry;
use crate::a2a::A2aClient;
use crate::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub use llm::GeminiSpecialist;
pub use local::{
    CompetitivePricingStep, DecisionBriefStep, EvaluationStep, FxImpactStep, MarginPlanningStep,
    MarketResearchStep, VendorFxStep,
};
pub use remote::RemoteAgentSpecialist;

pub const MARKET_RESEARCH: &str = "market_research";
pub const COMPETITIVE_PRICING: &str = "competitive_pricing";
pub const FX_SNAPSHOT: &str = "fx_snapshot";
pub const FX_IMPACT: &str = "fx_impact";
pub const MARGIN_SCENARIOS: &str = "margin_scenarios";
pub const DECISION_BRIEF: &str = "decision_brief";
pub const EVALUATION: &str = "evaluation";

/// Outputs the decision brief cannot be written without.
pub const ANALYTICAL_OUTPUTS: [&str; 4] = [MARKET_RESEARCH, COMPETITIVE_PRICING, FX_IMPACT, MARGIN_SCENARIOS];

/// Steps whose failure ends the run.
pub const MANDATORY_STEPS: [&str; 2] = [DECISION_BRIEF, EVALUATION];

#[async_trait::async_trait]
pub trait Specialist: Send + Sync {
    /// Output name this step records into the context.
    fn name(&self) -> &'static str;

    /// Outputs that must already be recorded before this step can run.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput>;
}

//
// ================= Step Context =================
//

/// Everything a step may read: the request, earlier outputs, prior memory
/// and the tool registry. Earlier outputs are append-only.
pub struct StepContext {
    pub run_id: Uuid,
    pub request: Arc<PricingRequestConfig>,
    pub prior_memory: Option<Arc<MemoryEntry>>,
    outputs: BTreeMap<String, StepOutput>,
    tools: Arc<ToolRegistry>,
    collector: ObservabilityCollector,
}

impl StepContext {
    pub fn new(
        run_id: Uuid,
        request: Arc<PricingRequestConfig>,
        tools: Arc<ToolRegistry>,
        collector: ObservabilityCollector,
    ) -> Self {
        Self {
            run_id,
            request,
            prior_memory: None,
            outputs: BTreeMap::new(),
            tools,
            collector,
        }
    }

    pub fn with_prior_memory(mut self, entry: Option<Arc<MemoryEntry>>) -> Self {
        self.prior_memory = entry;
        self
    }

    /// Record a step output. A name can only be written once.
    pub fn record(&mut self, name: &str, output: StepOutput) -> Result<()> {
        if self.outputs.contains_key(name) {
            return Err(OrchestrationError::StepFailure {
                step: name.to_string(),
                message: "output already recorded for this run".to_string(),
            });
        }
        self.outputs.insert(name.to_string(), output);
        Ok(())
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.contains_key(name)
    }

    pub fn output(&self, name: &str) -> Option<&StepOutput> {
        self.outputs.get(name)
    }

    pub fn outputs(&self) -> &BTreeMap<String, StepOutput> {
        &self.outputs
    }

    pub fn payload(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name).map(|o| &o.payload)
    }

    /// Typed view of one field of an earlier step's payload.
    pub fn payload_field<T: DeserializeOwned>(&self, name: &str, field: &str) -> Option<T> {
        self.payload(name)
            .and_then(|p| p.get(field))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Like `payload_field`, but a missing or unreadable field is a failure
    /// of the step asking for it.
    pub fn require_field<T: DeserializeOwned>(&self, step: &str, name: &str, field: &str) -> Result<T> {
        let value = self
            .payload(name)
            .and_then(|p| p.get(field))
            .ok_or_else(|| OrchestrationError::StepFailure {
                step: step.to_string(),
                message: format!("`{}.{}` is not available", name, field),
            })?;

        serde_json::from_value(value.clone()).map_err(|e| OrchestrationError::StepFailure {
            step: step.to_string(),
            message: format!("`{}.{}` is unreadable: {}", name, field, e),
        })
    }

    pub fn collector(&self) -> &ObservabilityCollector {
        &self.collector
    }

    /// Run a registry tool, recorded as a tool call for this run.
    pub async fn call_tool(&self, name: &str, parameters: Value) -> Result<Value> {
        debug!(run_id = %self.run_id, tool = %name, "calling tool");
        self.collector
            .observe(self.run_id, EventKind::ToolCall, name, self.tools.execute(name, parameters))
            .await
    }
}

//
// ================= Specialist Set =================
//

/// One specialist per output name.
#[derive(Clone, Default)]
pub struct SpecialistSet {
    specialists: HashMap<&'static str, Arc<dyn Specialist>>,
}

impl SpecialistSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic local specialists for every step.
    pub fn local() -> Self {
        let mut set = Self::new();
        set.replace(Arc::new(MarketResearchStep));
        set.replace(Arc::new(CompetitivePricingStep));
        set.replace(Arc::new(VendorFxStep));
        set.replace(Arc::new(FxImpactStep));
        set.replace(Arc::new(MarginPlanningStep));
        set.replace(Arc::new(DecisionBriefStep));
        set.replace(Arc::new(EvaluationStep::default()));
        set
    }

    /// Install `specialist` under its own name, replacing any previous one.
    pub fn replace(&mut self, specialist: Arc<dyn Specialist>) -> &mut Self {
        self.specialists.insert(specialist.name(), specialist);
        self
    }

    pub fn with(mut self, specialist: Arc<dyn Specialist>) -> Self {
        self.replace(specialist);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Specialist>> {
        self.specialists.get(name).cloned()
    }

    pub fn for_state(&self, state: PipelineState) -> Option<Arc<dyn Specialist>> {
        state.step_name().and_then(|name| self.get(name))
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.specialists.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Steps whose text a model or remote agent may produce. The FX snapshot is
/// always tool-backed and evaluation always scores locally.
const DELEGATED_STEPS: [&str; 5] = [
    MARKET_RESEARCH,
    COMPETITIVE_PRICING,
    FX_IMPACT,
    MARGIN_SCENARIOS,
    DECISION_BRIEF,
];

/// Build the specialist variant selected by `STEP_BACKEND`.
pub fn specialists_from_config(config: &AppConfig) -> Result<SpecialistSet> {
    let mut set = SpecialistSet::local();

    match config.step_backend {
        StepBackend::Local => {}
        StepBackend::Gemini => {
            let key = config.gemini_api_key.clone().ok_or_else(|| {
                OrchestrationError::ConfigError("GEMINI_API_KEY is not set".to_string())
            })?;
            let client = Arc::new(GeminiClient::new(key, config.gemini_model.clone())?);

            for name in DELEGATED_STEPS {
                if let Some(inner) = set.get(name) {
                    set.replace(Arc::new(GeminiSpecialist::new(inner, Arc::clone(&client))));
                }
            }
        }
        StepBackend::Remote => {
            let url = config.a2a_agent_url.clone().ok_or_else(|| {
                OrchestrationError::ConfigError("A2A_AGENT_URL is not set".to_string())
            })?;
            let timeout = config.step_timeout.unwrap_or(Duration::from_secs(60));
            let client = A2aClient::new(url, timeout)?;

            for name in DELEGATED_STEPS {
                if let Some(inner) = set.get(name) {
                    set.replace(Arc::new(RemoteAgentSpecialist::new(
                        name,
                        inner.dependencies(),
                        client.clone(),
                    )));
                }
            }
        }
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::SyntheticFxProvider;
    use crate::tools::{create_default_registry, PRODUCT_SNAPSHOT_TOOL};
    use serde_json::json;

    fn context() -> StepContext {
        let request = PricingRequestConfig::new("LaptopX", "EU", "CNY", "EUR", 1000, 3000.0);
        StepContext::new(
            Uuid::new_v4(),
            Arc::new(request),
            Arc::new(create_default_registry(Arc::new(SyntheticFxProvider))),
            ObservabilityCollector::new(),
        )
    }

    #[test]
    fn test_outputs_are_append_only() {
        let mut ctx = context();
        ctx.record(MARKET_RESEARCH, StepOutput::new("a", json!({"x": 1})))
            .unwrap();
        let second = ctx.record(MARKET_RESEARCH, StepOutput::new("b", json!({"x": 2})));

        assert!(second.is_err());
        assert_eq!(ctx.payload(MARKET_RESEARCH).unwrap()["x"], 1);
        assert_eq!(ctx.payload_field::<u32>(MARKET_RESEARCH, "x"), Some(1));
    }

    #[test]
    fn test_require_field_names_the_gap() {
        let ctx = context();
        let err = ctx
            .require_field::<f64>(FX_IMPACT, FX_SNAPSHOT, "fx_rate")
            .unwrap_err();
        assert!(err.to_string().contains("fx_snapshot.fx_rate"));
    }

    #[tokio::test]
    async fn test_call_tool_is_observed() {
        let ctx = context();
        ctx.call_tool(
            PRODUCT_SNAPSHOT_TOOL,
            json!({"product_id": "LaptopX", "region": "EU"}),
        )
        .await
        .unwrap();

        let summary = ctx.collector().summary_for_run(ctx.run_id).await;
        assert_eq!(summary.tool_calls, 1);
    }

    #[test]
    fn test_local_set_covers_every_step() {
        let set = SpecialistSet::local();
        assert_eq!(set.names().len(), 7);
        assert!(set.for_state(PipelineState::MarginPlanning).is_some());
        assert!(set.for_state(PipelineState::Init).is_none());
    }

    #[test]
    fn test_local_backend_from_default_config() {
        let set = specialists_from_config(&AppConfig::default()).unwrap();
        assert_eq!(set.names().len(), 7);
    }
}

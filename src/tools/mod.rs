//! Tool trait and registry
//!
//! Tools are the deterministic substrate the specialist steps call into.
//! Every tool takes a JSON parameter object and returns JSON data.

pub mod pricing;
pub mod seed;

use crate::error::OrchestrationError;
use crate::fx::FxProvider;
use crate::models::{CompetitorSnapshot, FxQuoteRequest, FxScenarioSet, ToolInput, ToolOutput};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const PRODUCT_SNAPSHOT_TOOL: &str = "get_product_snapshot";
pub const COMPETITOR_SNAPSHOT_TOOL: &str = "get_competitor_price_snapshot";
pub const FX_IMPACT_TOOL: &str = "calculate_fx_impact_scenarios";
pub const MARGIN_PLAN_TOOL: &str = "plan_margin_scenarios";
pub const RECOMMENDATION_TOOL: &str = "build_pricing_recommendation";
pub const VENDOR_FX_TOOL: &str = "fetch_vendor_fx_rates";

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Look up and run a tool, turning an unsuccessful output into an error.
    pub async fn execute(&self, name: &str, parameters: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| OrchestrationError::ToolNotFound(name.to_string()))?;

        let input = ToolInput {
            tool_name: name.to_string(),
            parameters,
        };
        let output = tool.execute(&input).await?;

        if !output.success {
            return Err(OrchestrationError::ToolError(format!(
                "{} reported failure: {}",
                name,
                output.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        Ok(output.data)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_object_parameters(input: &ToolInput) -> Result<()> {
    if input.parameters.is_object() {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidToolInput(format!(
            "{} expects a JSON object",
            input.tool_name
        )))
    }
}

fn parse_parameters<T: DeserializeOwned>(input: &ToolInput) -> Result<T> {
    ensure_object_parameters(input)?;
    serde_json::from_value(input.parameters.clone()).map_err(|e| {
        OrchestrationError::InvalidToolInput(format!("{}: {}", input.tool_name, e))
    })
}

//
// ================= Snapshot Tools =================
//

#[derive(Deserialize)]
struct ProductRegionParams {
    product_id: String,
    region: String,
}

pub struct ProductSnapshotTool;

#[async_trait::async_trait]
impl Tool for ProductSnapshotTool {
    fn name(&self) -> &'static str {
        PRODUCT_SNAPSHOT_TOOL
    }

    fn description(&self) -> &'static str {
        "Synthetic ERP snapshot (cost, list price, MOQ, lead time) for a product in a region"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let params: ProductRegionParams = parse_parameters(input)?;
        let snapshot = pricing::get_product_snapshot(&params.product_id, &params.region)?;
        Ok(ToolOutput::ok(serde_json::to_value(snapshot)?))
    }
}

#[derive(Deserialize)]
struct CompetitorParams {
    product_id: String,
    region: String,
    /// Defaults to the region's home currency.
    #[serde(default)]
    currency: Option<String>,
}

pub struct CompetitorSnapshotTool;

#[async_trait::async_trait]
impl Tool for CompetitorSnapshotTool {
    fn name(&self) -> &'static str {
        COMPETITOR_SNAPSHOT_TOOL
    }

    fn description(&self) -> &'static str {
        "Synthetic competitor offers and the low/mid/high competitive band"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let params: CompetitorParams = parse_parameters(input)?;
        let currency = params
            .currency
            .unwrap_or_else(|| pricing::region_currency(&params.region).to_string());
        let snapshot =
            pricing::get_competitor_price_snapshot(&params.product_id, &params.region, &currency)?;
        Ok(ToolOutput::ok(serde_json::to_value(snapshot)?))
    }
}

//
// ================= Calculation Tools =================
//

#[derive(Deserialize)]
struct FxImpactParams {
    unit_cost: f64,
    purchase_currency: String,
    reporting_currency: String,
    fx_rate: f64,
    #[serde(default)]
    shifts: Option<Vec<f64>>,
    #[serde(default = "default_volume")]
    volume: u32,
}

fn default_volume() -> u32 {
    1
}

pub struct FxImpactTool;

#[async_trait::async_trait]
impl Tool for FxImpactTool {
    fn name(&self) -> &'static str {
        FX_IMPACT_TOOL
    }

    fn description(&self) -> &'static str {
        "Landed cost under a grid of FX shifts around the current rate"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let params: FxImpactParams = parse_parameters(input)?;
        let shifts = params
            .shifts
            .unwrap_or_else(|| pricing::DEFAULT_FX_SHIFTS.to_vec());

        let set = pricing::calculate_fx_impact_scenarios(
            params.unit_cost,
            &params.purchase_currency,
            &params.reporting_currency,
            params.fx_rate,
            &shifts,
            params.volume,
        )?;
        Ok(ToolOutput::ok(serde_json::to_value(set)?))
    }
}

#[derive(Deserialize)]
struct MarginPlanParams {
    unit_cost: f64,
    candidate_prices: Vec<f64>,
    #[serde(default)]
    target_margin: Option<f64>,
}

pub struct MarginPlanTool;

#[async_trait::async_trait]
impl Tool for MarginPlanTool {
    fn name(&self) -> &'static str {
        MARGIN_PLAN_TOOL
    }

    fn description(&self) -> &'static str {
        "Margin and target check for each candidate price"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let params: MarginPlanParams = parse_parameters(input)?;
        let set = pricing::plan_margin_scenarios(
            params.unit_cost,
            &params.candidate_prices,
            params.target_margin,
        )?;
        Ok(ToolOutput::ok(serde_json::to_value(set)?))
    }
}

#[derive(Deserialize)]
struct RecommendationParams {
    unit_cost: f64,
    #[serde(default)]
    competitors: Option<CompetitorSnapshot>,
    #[serde(default)]
    fx_scenarios: Option<FxScenarioSet>,
    #[serde(default)]
    target_margin: Option<f64>,
    #[serde(default)]
    candidate_prices: Vec<f64>,
}

pub struct RecommendationTool;

#[async_trait::async_trait]
impl Tool for RecommendationTool {
    fn name(&self) -> &'static str {
        RECOMMENDATION_TOOL
    }

    fn description(&self) -> &'static str {
        "Compose a single recommended price from margins, competitor band and FX scenarios"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let params: RecommendationParams = parse_parameters(input)?;
        let recommendation = pricing::build_pricing_recommendation(
            params.unit_cost,
            params.competitors.as_ref(),
            params.fx_scenarios.as_ref(),
            params.target_margin,
            &params.candidate_prices,
        )?;
        Ok(ToolOutput::ok(serde_json::to_value(recommendation)?))
    }
}

//
// ================= Vendor FX Tool =================
//

/// Rate lookup through whichever provider the registry was built with.
pub struct VendorFxTool {
    provider: Arc<dyn FxProvider>,
}

impl VendorFxTool {
    pub fn new(provider: Arc<dyn FxProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl Tool for VendorFxTool {
    fn name(&self) -> &'static str {
        VENDOR_FX_TOOL
    }

    fn description(&self) -> &'static str {
        "Vendor FX rates for a base currency, tagged live or synthetic"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let request: FxQuoteRequest = parse_parameters(input)?;
        let quote = self.provider.quote(&request).await?;
        Ok(ToolOutput::ok(serde_json::to_value(quote)?))
    }
}

/// Registry with every pricing tool, using `fx_provider` for vendor rates.
pub fn create_default_registry(fx_provider: Arc<dyn FxProvider>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(ProductSnapshotTool));
    registry.register(Arc::new(CompetitorSnapshotTool));
    registry.register(Arc::new(FxImpactTool));
    registry.register(Arc::new(MarginPlanTool));
    registry.register(Arc::new(RecommendationTool));
    registry.register(Arc::new(VendorFxTool::new(fx_provider)));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::SyntheticFxProvider;
    use crate::models::{FxQuote, FxSource, MarginScenarioSet};
    use serde_json::json;

    fn registry() -> ToolRegistry {
        create_default_registry(Arc::new(SyntheticFxProvider))
    }

    #[test]
    fn test_registry_lists_all_tools() {
        let registry = registry();
        let names = registry.list();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&VENDOR_FX_TOOL));
        assert!(names.contains(&MARGIN_PLAN_TOOL));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let result = registry().execute("nope", json!({})).await;
        assert!(matches!(result, Err(OrchestrationError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_margin_tool_round_trip() {
        let data = registry()
            .execute(
                MARGIN_PLAN_TOOL,
                json!({"unit_cost": 10.0, "candidate_prices": [12.0, 20.0], "target_margin": 0.3}),
            )
            .await
            .unwrap();
        let set: MarginScenarioSet = serde_json::from_value(data).unwrap();
        assert_eq!(set.scenarios.len(), 2);
        assert!(!set.scenarios[0].meets_target);
        assert!(set.scenarios[1].meets_target);
    }

    #[tokio::test]
    async fn test_competitor_tool_currency_defaults_to_region() {
        let defaulted = registry()
            .execute(COMPETITOR_SNAPSHOT_TOOL, json!({"product_id": "LaptopX", "region": "UK"}))
            .await
            .unwrap();
        assert_eq!(defaulted["currency"], "GBP");

        let explicit = registry()
            .execute(
                COMPETITOR_SNAPSHOT_TOOL,
                json!({"product_id": "LaptopX", "region": "UK", "currency": "EUR"}),
            )
            .await
            .unwrap();
        assert_eq!(explicit["currency"], "EUR");
    }

    #[tokio::test]
    async fn test_non_object_parameters_rejected() {
        let result = registry().execute(FX_IMPACT_TOOL, json!([1, 2])).await;
        assert!(matches!(result, Err(OrchestrationError::InvalidToolInput(_))));
    }

    #[tokio::test]
    async fn test_vendor_fx_tool_uses_provider() {
        let data = registry()
            .execute(
                VENDOR_FX_TOOL,
                json!({"base_currency": "cny", "target_currencies": ["eur"], "amount": 100.0}),
            )
            .await
            .unwrap();
        let quote: FxQuote = serde_json::from_value(data).unwrap();
        assert_eq!(quote.base, "CNY");
        assert_eq!(quote.source, FxSource::Synthetic);
        assert!(quote.converted_amounts.contains_key("EUR"));
    }
}

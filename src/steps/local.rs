//! Local specialists
//!
//! Deterministic steps built on the tool registry. They are the default
//! variant and the inner step wrapped by the LLM-backed variant.

use super::{
    Specialist, StepContext, ANALYTICAL_OUTPUTS, COMPETITIVE_PRICING, DECISION_BRIEF, EVALUATION,
    FX_IMPACT, FX_SNAPSHOT, MARGIN_SCENARIOS, MARKET_RESEARCH,
};
use crate::error::OrchestrationError;
use crate::evaluation::{create_default_evaluation_engine, EvaluationEngine};
use crate::models::{
    CompetitorSnapshot, FxQuote, FxScenarioSet, MarginScenarioSet, PricingRecommendation,
    ProductSnapshot, RiskLevel, StepOutput,
};
use crate::tools::pricing::{candidate_prices, classify_fx_risk};
use crate::tools::{
    COMPETITOR_SNAPSHOT_TOOL, FX_IMPACT_TOOL, MARGIN_PLAN_TOOL, PRODUCT_SNAPSHOT_TOOL,
    RECOMMENDATION_TOOL, VENDOR_FX_TOOL,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

fn step_failure(step: &str, message: impl Into<String>) -> OrchestrationError {
    OrchestrationError::StepFailure {
        step: step.to_string(),
        message: message.into(),
    }
}

/// FX risk of the recommended price, as recorded by margin planning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FxRiskAssessment {
    pub level: RiskLevel,
    pub base_margin: f64,
    pub worst_case_margin: f64,
    pub erosion_pp: f64,
}

//
// ================= Market Research =================
//

pub struct MarketResearchStep;

#[async_trait::async_trait]
impl Specialist for MarketResearchStep {
    fn name(&self) -> &'static str {
        MARKET_RESEARCH
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput> {
        let request = &ctx.request;
        let data = ctx
            .call_tool(
                PRODUCT_SNAPSHOT_TOOL,
                json!({"product_id": request.product_id, "region": request.region}),
            )
            .await?;
        let product: ProductSnapshot = serde_json::from_value(data)?;

        let narrative = format!(
            "{} ({}) in {} lists at {:.2} {} in the ERP snapshot, with a minimum order of {} units and a {}-day lead time. \
             The request covers {} units bought at {:.2} {} each.",
            request.product_id,
            request.category,
            request.region,
            product.list_price,
            product.currency,
            product.moq_units,
            product.lead_time_days,
            request.volume,
            request.unit_cost,
            request.purchase_currency,
        );

        Ok(StepOutput::new(
            narrative,
            json!({
                "product_snapshot": product,
                "category": request.category,
                "volume": request.volume,
                "below_moq": request.volume < product.moq_units,
            }),
        ))
    }
}

//
// ================= Competitive Pricing =================
//

pub struct CompetitivePricingStep;

#[async_trait::async_trait]
impl Specialist for CompetitivePricingStep {
    fn name(&self) -> &'static str {
        COMPETITIVE_PRICING
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput> {
        let request = &ctx.request;
        let data = ctx
            .call_tool(
                COMPETITOR_SNAPSHOT_TOOL,
                json!({
                    "product_id": request.product_id,
                    "region": request.region,
                    "currency": request.reporting_currency
                }),
            )
            .await?;
        let competitors: CompetitorSnapshot = serde_json::from_value(data)?;

        let band = competitors.band;
        let promo_count = competitors.offers.iter().filter(|o| o.is_promo).count();
        let current_position = request.current_price.map(|p| band.position_of(p));

        let mut narrative = format!(
            "{} competitors quote {} in {}; the competitive band is {:.2} / {:.2} / {:.2} {} (low / mid / high) and {} offers are on promotion.",
            competitors.offers.len(),
            request.product_id,
            request.region,
            band.low,
            band.mid,
            band.high,
            competitors.currency,
            promo_count
        );
        if let (Some(price), Some(position)) = (request.current_price, current_position) {
            narrative.push_str(&format!(" The current price of {:.2} is {}.", price, position));
        }

        Ok(StepOutput::new(
            narrative,
            json!({
                "competitor_snapshot": competitors,
                "band": band,
                "promo_count": promo_count,
                "current_price_position": current_position,
            }),
        ))
    }
}

//
// ================= Vendor FX Snapshot =================
//

/// Tool-backed step: one vendor quote from purchase to reporting currency.
pub struct VendorFxStep;

#[async_trait::async_trait]
impl Specialist for VendorFxStep {
    fn name(&self) -> &'static str {
        FX_SNAPSHOT
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput> {
        let request = &ctx.request;
        let data = ctx
            .call_tool(
                VENDOR_FX_TOOL,
                json!({
                    "base_currency": request.purchase_currency,
                    "target_currencies": [request.reporting_currency],
                    "amount": request.unit_cost * request.volume as f64,
                }),
            )
            .await?;
        let quote: FxQuote = serde_json::from_value(data)?;

        let rate = quote.rate_for(&request.reporting_currency).ok_or_else(|| {
            step_failure(
                FX_SNAPSHOT,
                format!("quote has no rate for {}", request.reporting_currency),
            )
        })?;

        let narrative = format!(
            "Vendor FX ({} as of {}): 1 {} = {:.6} {}.",
            quote.source, quote.as_of_date, quote.base, rate, request.reporting_currency
        );

        Ok(StepOutput::new(
            narrative,
            json!({
                "fx_rate": rate,
                "source": quote.source,
                "quote": quote,
            }),
        ))
    }
}

//
// ================= FX Impact =================
//

pub struct FxImpactStep;

#[async_trait::async_trait]
impl Specialist for FxImpactStep {
    fn name(&self) -> &'static str {
        FX_IMPACT
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[FX_SNAPSHOT]
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput> {
        let request = &ctx.request;
        let rate: f64 = ctx.require_field(FX_IMPACT, FX_SNAPSHOT, "fx_rate")?;

        let data = ctx
            .call_tool(
                FX_IMPACT_TOOL,
                json!({
                    "unit_cost": request.unit_cost,
                    "purchase_currency": request.purchase_currency,
                    "reporting_currency": request.reporting_currency,
                    "fx_rate": rate,
                    "volume": request.volume,
                }),
            )
            .await?;
        let scenarios: FxScenarioSet = serde_json::from_value(data)?;

        let baseline = scenarios
            .baseline()
            .ok_or_else(|| step_failure(FX_IMPACT, "scenario set has no baseline"))?;
        let worst = scenarios
            .worst_case()
            .ok_or_else(|| step_failure(FX_IMPACT, "scenario set is empty"))?;

        let narrative = format!(
            "At {:.6} {}/{} the landed unit cost is {:.2} {} ({:.2} for {} units). \
             A {:+.0}% FX move lifts it to {:.2} {}.",
            rate,
            scenarios.purchase_currency,
            scenarios.reporting_currency,
            baseline.landed_unit_cost,
            scenarios.reporting_currency,
            baseline.landed_total_cost,
            scenarios.volume,
            worst.fx_shift_pct * 100.0,
            worst.landed_unit_cost,
            scenarios.reporting_currency,
        );

        let payload = json!({
            "baseline_landed_unit_cost": baseline.landed_unit_cost,
            "worst_case_landed_unit_cost": worst.landed_unit_cost,
            "fx_scenarios": scenarios,
        });
        Ok(StepOutput::new(narrative, payload))
    }
}

//
// ================= Margin Planning =================
//

/// Candidate prices, their margins on the baseline landed cost, the
/// recommended price and its FX risk.
pub struct MarginPlanningStep;

#[async_trait::async_trait]
impl Specialist for MarginPlanningStep {
    fn name(&self) -> &'static str {
        MARGIN_SCENARIOS
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[FX_IMPACT]
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput> {
        let request = &ctx.request;
        let fx: FxScenarioSet = ctx.require_field(MARGIN_SCENARIOS, FX_IMPACT, "fx_scenarios")?;
        let landed = fx
            .baseline()
            .map(|s| s.landed_unit_cost)
            .ok_or_else(|| step_failure(MARGIN_SCENARIOS, "FX scenarios have no baseline"))?;

        // Competitive pricing is optional here.
        let competitors: Option<CompetitorSnapshot> =
            ctx.payload_field(COMPETITIVE_PRICING, "competitor_snapshot");
        let band = competitors.as_ref().map(|c| c.band);
        let target = request.effective_target_margin();

        let candidates = candidate_prices(request.current_price, band.as_ref(), landed, target);

        let data = ctx
            .call_tool(
                MARGIN_PLAN_TOOL,
                json!({"unit_cost": landed, "candidate_prices": candidates, "target_margin": target}),
            )
            .await?;
        let mut margins: MarginScenarioSet = serde_json::from_value(data)?;
        if let Some(band) = &band {
            margins.annotate_with_band(band);
        }

        let data = ctx
            .call_tool(
                RECOMMENDATION_TOOL,
                json!({
                    "unit_cost": landed,
                    "competitors": competitors,
                    "fx_scenarios": fx,
                    "target_margin": target,
                    "candidate_prices": candidates,
                }),
            )
            .await?;
        let recommendation: PricingRecommendation = serde_json::from_value(data)?;

        let price = recommendation.recommended_price;
        let base_margin = recommendation.margin_at_price;
        let worst_case_margin = recommendation.worst_case_fx_margin.unwrap_or(base_margin);
        let fx_risk = FxRiskAssessment {
            level: classify_fx_risk(price, &fx, target),
            base_margin,
            worst_case_margin,
            erosion_pp: (base_margin - worst_case_margin) * 100.0,
        };

        let meeting = margins.scenarios.iter().filter(|s| s.meets_target).count();
        let narrative = format!(
            "{} candidate prices evaluated against a landed cost of {:.2} {}; {} meet the {:.1}% target. \
             Recommended {:.2} ({} price) at a {:.1}% margin, falling to {:.1}% in the worst FX case (risk {}).",
            margins.scenarios.len(),
            landed,
            request.reporting_currency,
            meeting,
            target * 100.0,
            price,
            recommendation.price_source,
            base_margin * 100.0,
            worst_case_margin * 100.0,
            fx_risk.level
        );

        Ok(StepOutput::new(
            narrative,
            json!({
                "margin_scenarios": margins,
                "recommendation": recommendation,
                "fx_risk": fx_risk,
            }),
        ))
    }
}

//
// ================= Decision Brief =================
//

/// Writes the narrative brief and its JSON mirror from the same inputs.
pub struct DecisionBriefStep;

fn recommended_action(
    level: RiskLevel,
    price: f64,
    currency: &str,
    purchase_currency: &str,
    meets_target: bool,
) -> String {
    let mut action = match level {
        RiskLevel::Critical => format!(
            "Do not commit volume at {:.2} {}; renegotiate purchase terms or hedge {} before pricing.",
            price, currency, purchase_currency
        ),
        RiskLevel::High => format!(
            "Adopt {:.2} {} and hedge the {}/{} exposure before confirming volume.",
            price, currency, purchase_currency, currency
        ),
        RiskLevel::Medium => format!(
            "Adopt {:.2} {} and review FX exposure at the next pricing cycle.",
            price, currency
        ),
        RiskLevel::Low => format!("Adopt {:.2} {} for the next pricing cycle.", price, currency),
    };
    if !meets_target {
        action.push_str(" The margin stays below target; escalate to the pricing manager.");
    }
    action
}

#[async_trait::async_trait]
impl Specialist for DecisionBriefStep {
    fn name(&self) -> &'static str {
        DECISION_BRIEF
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &ANALYTICAL_OUTPUTS
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput> {
        let request = &ctx.request;
        let product: ProductSnapshot =
            ctx.require_field(DECISION_BRIEF, MARKET_RESEARCH, "product_snapshot")?;
        let competitors: CompetitorSnapshot =
            ctx.require_field(DECISION_BRIEF, COMPETITIVE_PRICING, "competitor_snapshot")?;
        let fx: FxScenarioSet = ctx.require_field(DECISION_BRIEF, FX_IMPACT, "fx_scenarios")?;
        let margins: MarginScenarioSet =
            ctx.require_field(DECISION_BRIEF, MARGIN_SCENARIOS, "margin_scenarios")?;
        let recommendation: PricingRecommendation =
            ctx.require_field(DECISION_BRIEF, MARGIN_SCENARIOS, "recommendation")?;
        let fx_risk: FxRiskAssessment = ctx.require_field(DECISION_BRIEF, MARGIN_SCENARIOS, "fx_risk")?;
        let fx_source: Option<Value> = ctx.payload_field(FX_SNAPSHOT, "source");

        let currency = request.reporting_currency.as_str();
        let price = recommendation.recommended_price;
        let band = competitors.band;
        let position = band.position_of(price);
        let baseline = fx
            .baseline()
            .ok_or_else(|| step_failure(DECISION_BRIEF, "FX scenarios have no baseline"))?;
        let worst = fx
            .worst_case()
            .ok_or_else(|| step_failure(DECISION_BRIEF, "FX scenarios are empty"))?;
        let meeting = margins.scenarios.iter().filter(|s| s.meets_target).count();
        let action = recommended_action(
            fx_risk.level,
            price,
            currency,
            &request.purchase_currency,
            recommendation.meets_target,
        );

        let mut lines = vec![
            format!(
                "Decision brief: {} in {} (reporting in {})",
                request.product_id, request.region, currency
            ),
            String::new(),
            format!(
                "Market: {} lists at {:.2} {} with a {}-unit MOQ and a {}-day lead time; this order is {} units at {:.2} {} each.",
                product.product_id,
                product.list_price,
                product.currency,
                product.moq_units,
                product.lead_time_days,
                request.volume,
                request.unit_cost,
                request.purchase_currency
            ),
            format!(
                "Competitive position: {} competitors between {:.2} and {:.2} {}, band {:.2} / {:.2} / {:.2}; the recommended price is {}.",
                competitors.offers.len(),
                recommendation.competitor_min.unwrap_or(band.low),
                recommendation.competitor_max.unwrap_or(band.high),
                competitors.currency,
                band.low,
                band.mid,
                band.high,
                position
            ),
            format!(
                "FX exposure: baseline landed cost {:.2} {}, worst case {:.2} {} after a {:+.0}% move. FX risk is {}, with the margin moving from {:.1}% to {:.1}%.",
                baseline.landed_unit_cost,
                currency,
                worst.landed_unit_cost,
                currency,
                worst.fx_shift_pct * 100.0,
                fx_risk.level,
                fx_risk.base_margin * 100.0,
                fx_risk.worst_case_margin * 100.0
            ),
            format!(
                "Margin: {} candidate prices evaluated, {} meet the {:.1}% target.",
                margins.scenarios.len(),
                meeting,
                recommendation.target_margin * 100.0
            ),
            format!(
                "Recommendation: price at {:.2} {} ({} price) for a margin of {:.1}%.",
                price,
                currency,
                recommendation.price_source,
                recommendation.margin_at_price * 100.0
            ),
        ];

        let prior_session = ctx.prior_memory.as_ref().map(|entry| {
            let previous = entry
                .recommended_price()
                .map(|p| format!("{:.2} {}", p, entry.reporting_currency))
                .unwrap_or_else(|| "no price".to_string());
            lines.push(format!(
                "Prior session ({}): recommended {}.",
                entry.timestamp.format("%Y-%m-%d %H:%M"),
                previous
            ));
            json!({
                "run_id": entry.run_id,
                "timestamp": entry.timestamp,
                "recommended_price": entry.recommended_price(),
                "evaluation_score": entry.evaluation_score(),
            })
        });
        if let Some(notes) = &request.manager_notes {
            lines.push(format!("Manager notes: {}", notes));
        }
        lines.push(format!("Recommended action: {}", action));

        let structured_summary = json!({
            "product_id": request.product_id,
            "region": request.region,
            "reporting_currency": currency,
            "market_summary": {
                "list_price": product.list_price,
                "currency": product.currency,
                "moq_units": product.moq_units,
                "lead_time_days": product.lead_time_days,
                "volume": request.volume,
            },
            "competitive_position": {
                "band": band,
                "recommended_price_position": position,
                "competitor_min": recommendation.competitor_min,
                "competitor_mean": recommendation.competitor_mean,
                "competitor_max": recommendation.competitor_max,
            },
            "fx_risk": {
                "level": fx_risk.level,
                "base_margin_pct": fx_risk.base_margin,
                "worst_case_margin_pct": fx_risk.worst_case_margin,
                "erosion_pp": fx_risk.erosion_pp,
                "rate_source": fx_source,
            },
            "recommended_pricing": {
                "price": price,
                "currency": currency,
                "price_source": recommendation.price_source,
                "margin_pct": recommendation.margin_at_price,
                "target_margin": recommendation.target_margin,
                "meets_target": recommendation.meets_target,
            },
            "candidate_prices": margins.prices(),
            "rationale": recommendation.rationale,
            "recommended_action": action,
            "prior_session": prior_session,
        });

        Ok(StepOutput::new(
            lines.join("\n"),
            json!({ "structured_summary": structured_summary }),
        ))
    }
}

//
// ================= Evaluation =================
//

pub struct EvaluationStep {
    engine: Arc<EvaluationEngine>,
}

impl EvaluationStep {
    pub fn new(engine: Arc<EvaluationEngine>) -> Self {
        Self { engine }
    }
}

impl Default for EvaluationStep {
    fn default() -> Self {
        Self::new(Arc::new(create_default_evaluation_engine()))
    }
}

#[async_trait::async_trait]
impl Specialist for EvaluationStep {
    fn name(&self) -> &'static str {
        EVALUATION
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[DECISION_BRIEF]
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput> {
        let brief = ctx
            .output(DECISION_BRIEF)
            .ok_or_else(|| step_failure(EVALUATION, "no decision brief recorded"))?;
        let summary = brief
            .payload
            .get("structured_summary")
            .ok_or_else(|| step_failure(EVALUATION, "decision brief has no structured summary"))?;
        let summary_json = serde_json::to_string(summary)?;

        let result = self.engine.evaluate(&brief.narrative, &summary_json);
        let narrative = format!("Evaluation score {:.2}/5. {}", result.overall_score, result.feedback);

        Ok(StepOutput::new(narrative, serde_json::to_value(&result)?))
    }
}

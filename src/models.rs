//! Core data models for the FX pricing pipeline

use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Tolerance used for every floating comparison in margin and FX math.
pub const FLOAT_EPSILON: f64 = 1e-6;

/// Target margin applied when the request does not carry one.
pub const DEFAULT_TARGET_MARGIN: f64 = 0.25;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    fn rank(&self) -> u8 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
            RiskLevel::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

/// Where an FX quote came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FxSource {
    Live,
    Synthetic,
}

impl fmt::Display for FxSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FxSource::Live => write!(f, "live"),
            FxSource::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Whether a recommended price was one of the planned candidates or
/// computed outside of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Candidate,
    Custom,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceSource::Candidate => write!(f, "candidate"),
            PriceSource::Custom => write!(f, "custom"),
        }
    }
}

//
// ================= Request =================
//

/// One pricing question submitted to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingRequestConfig {
    pub product_id: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub region: String,
    pub reporting_currency: String,
    pub purchase_currency: String,
    pub volume: u32,
    pub unit_cost: f64,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub target_margin: Option<f64>,
    #[serde(default)]
    pub manager_notes: Option<String>,
    #[serde(default = "default_user")]
    pub user_id: String,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_user() -> String {
    "anonymous".to_string()
}

impl PricingRequestConfig {
    pub fn new(
        product_id: impl Into<String>,
        region: impl Into<String>,
        purchase_currency: impl Into<String>,
        reporting_currency: impl Into<String>,
        volume: u32,
        unit_cost: f64,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            category: default_category(),
            region: region.into(),
            reporting_currency: reporting_currency.into(),
            purchase_currency: purchase_currency.into(),
            volume,
            unit_cost,
            current_price: None,
            target_margin: None,
            manager_notes: None,
            user_id: default_user(),
        }
    }

    pub fn with_current_price(mut self, price: f64) -> Self {
        self.current_price = Some(price);
        self
    }

    pub fn with_target_margin(mut self, margin: f64) -> Self {
        self.target_margin = Some(margin);
        self
    }

    pub fn with_manager_notes(mut self, notes: impl Into<String>) -> Self {
        self.manager_notes = Some(notes.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn effective_target_margin(&self) -> f64 {
        self.target_margin.unwrap_or(DEFAULT_TARGET_MARGIN)
    }

    /// Reject malformed fields before any step runs.
    pub fn validate(&self) -> Result<()> {
        if self.product_id.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "product_id must not be empty".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "region must not be empty".to_string(),
            ));
        }
        for (field, code) in [
            ("purchase_currency", &self.purchase_currency),
            ("reporting_currency", &self.reporting_currency),
        ] {
            let code = code.trim();
            if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(OrchestrationError::InvalidInput(format!(
                    "{} must be a three-letter currency code, got '{}'",
                    field, code
                )));
            }
        }
        if self.volume == 0 {
            return Err(OrchestrationError::InvalidInput(
                "volume must be a positive integer".to_string(),
            ));
        }
        if !self.unit_cost.is_finite() || self.unit_cost <= 0.0 {
            return Err(OrchestrationError::InvalidInput(format!(
                "unit_cost must be positive, got {}",
                self.unit_cost
            )));
        }
        if let Some(price) = self.current_price {
            if !price.is_finite() || price <= 0.0 {
                return Err(OrchestrationError::InvalidInput(format!(
                    "current_price must be positive, got {}",
                    price
                )));
            }
        }
        if let Some(margin) = self.target_margin {
            if !(0.0..1.0).contains(&margin) {
                return Err(OrchestrationError::InvalidInput(format!(
                    "target_margin must be in [0, 1), got {}",
                    margin
                )));
            }
        }
        Ok(())
    }
}

//
// ================= Synthetic Records =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSnapshot {
    pub product_id: String,
    pub region: String,
    pub category: String,
    pub currency: String,
    pub unit_cost: f64,
    pub list_price: f64,
    pub moq_units: u32,
    pub lead_time_days: u32,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitorOffer {
    pub competitor_id: String,
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub is_promo: bool,
    pub promo_label: Option<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CompetitiveBand {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl CompetitiveBand {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low - FLOAT_EPSILON && price <= self.high + FLOAT_EPSILON
    }

    pub fn position_of(&self, price: f64) -> &'static str {
        if price < self.low - FLOAT_EPSILON {
            "below band"
        } else if price > self.high + FLOAT_EPSILON {
            "above band"
        } else {
            "within band"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitorSnapshot {
    pub product_id: String,
    pub region: String,
    pub currency: String,
    pub offers: Vec<CompetitorOffer>,
    pub band: CompetitiveBand,
}

impl CompetitorSnapshot {
    pub fn min_price(&self) -> Option<f64> {
        self.offers.iter().map(|o| o.price).reduce(f64::min)
    }

    pub fn max_price(&self) -> Option<f64> {
        self.offers.iter().map(|o| o.price).reduce(f64::max)
    }

    pub fn mean_price(&self) -> Option<f64> {
        if self.offers.is_empty() {
            return None;
        }
        Some(self.offers.iter().map(|o| o.price).sum::<f64>() / self.offers.len() as f64)
    }
}

//
// ================= FX & Margin =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FxScenario {
    pub label: String,
    pub fx_shift_pct: f64,
    pub effective_rate: f64,
    pub landed_unit_cost: f64,
    pub landed_total_cost: f64,
    pub pct_change_vs_baseline: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FxScenarioSet {
    pub purchase_currency: String,
    pub reporting_currency: String,
    pub base_rate: f64,
    pub unit_cost: f64,
    pub volume: u32,
    pub scenarios: Vec<FxScenario>,
}

impl FxScenarioSet {
    pub fn baseline(&self) -> Option<&FxScenario> {
        self.scenarios.iter().find(|s| s.fx_shift_pct == 0.0)
    }

    /// Scenario with the highest landed unit cost.
    pub fn worst_case(&self) -> Option<&FxScenario> {
        self.scenarios
            .iter()
            .max_by(|a, b| a.landed_unit_cost.total_cmp(&b.landed_unit_cost))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarginScenario {
    pub price: f64,
    pub margin_pct: f64,
    pub margin_absolute: f64,
    pub meets_target: bool,
    pub viable: bool,
    pub competitiveness_note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarginScenarioSet {
    pub unit_cost: f64,
    pub target_margin: Option<f64>,
    pub scenarios: Vec<MarginScenario>,
}

impl MarginScenarioSet {
    pub fn prices(&self) -> Vec<f64> {
        self.scenarios.iter().map(|s| s.price).collect()
    }

    pub fn contains_price(&self, price: f64) -> bool {
        self.scenarios
            .iter()
            .any(|s| (s.price - price).abs() <= FLOAT_EPSILON)
    }

    /// Fill in each row's position relative to a competitor band.
    pub fn annotate_with_band(&mut self, band: &CompetitiveBand) {
        for scenario in &mut self.scenarios {
            scenario.competitiveness_note = band.position_of(scenario.price).to_string();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingRecommendation {
    pub recommended_price: f64,
    pub price_source: PriceSource,
    pub unit_cost: f64,
    pub target_margin: f64,
    pub margin_at_price: f64,
    pub meets_target: bool,
    pub competitor_min: Option<f64>,
    pub competitor_mean: Option<f64>,
    pub competitor_max: Option<f64>,
    pub worst_case_fx_margin: Option<f64>,
    pub rationale: Vec<String>,
}

//
// ================= Vendor FX =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FxQuoteRequest {
    pub base_currency: String,
    pub target_currencies: Vec<String>,
    #[serde(default)]
    pub amount: Option<f64>,
}

impl FxQuoteRequest {
    pub fn new(base: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            base_currency: base.into(),
            target_currencies: targets,
            amount: None,
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Upper-cased copy, rejecting empty or non-positive fields.
    pub fn normalized(&self) -> Result<Self> {
        let base = self.base_currency.trim().to_uppercase();
        if base.is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "base_currency must not be empty".to_string(),
            ));
        }

        let targets: Vec<String> = self
            .target_currencies
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        if targets.is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "at least one target currency is required".to_string(),
            ));
        }

        if let Some(amount) = self.amount {
            if !amount.is_finite() || amount <= 0.0 {
                return Err(OrchestrationError::InvalidInput(format!(
                    "amount must be positive, got {}",
                    amount
                )));
            }
        }

        Ok(Self {
            base_currency: base,
            target_currencies: targets,
            amount: self.amount,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FxQuote {
    pub base: String,
    pub as_of_date: String,
    pub source: FxSource,
    pub rates: BTreeMap<String, f64>,
    #[serde(default)]
    pub converted_amounts: BTreeMap<String, f64>,
}

impl FxQuote {
    pub fn rate_for(&self, currency: &str) -> Option<f64> {
        self.rates.get(&currency.to_uppercase()).copied()
    }
}

//
// ================= Evaluation =================
//

/// A derived metric is either a flag or a number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
}

impl MetricValue {
    /// Booleans are coerced to 0.0 / 1.0.
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Bool(true) => 1.0,
            MetricValue::Bool(false) => 0.0,
            MetricValue::Number(n) => *n,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub overall_score: f64,
    pub dimensions: BTreeMap<String, f64>,
    pub derived_metrics: BTreeMap<String, MetricValue>,
    pub feedback: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

//
// ================= Step I/O =================
//

/// What every specialist step returns: prose plus a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOutput {
    pub narrative: String,
    pub payload: serde_json::Value,
}

impl StepOutput {
    pub fn new(narrative: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            narrative: narrative.into(),
            payload,
        }
    }
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laptop_request() -> PricingRequestConfig {
        PricingRequestConfig::new("LaptopX", "EU", "CNY", "EUR", 1000, 3000.0)
            .with_current_price(1200.0)
            .with_target_margin(0.25)
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(laptop_request().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_cost_and_volume() {
        let mut request = laptop_request();
        request.unit_cost = 0.0;
        assert!(matches!(
            request.validate(),
            Err(OrchestrationError::InvalidInput(_))
        ));

        let mut request = laptop_request();
        request.volume = 0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_rejects_target_margin_of_one() {
        let request = laptop_request().with_target_margin(1.0);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!(std::cmp::max(RiskLevel::Low, RiskLevel::High), RiskLevel::High);
    }

    #[test]
    fn test_metric_value_coercion() {
        let parsed: BTreeMap<String, MetricValue> =
            serde_json::from_str(r#"{"a": true, "b": false, "c": 2.5}"#).unwrap();
        assert_eq!(parsed["a"].as_f64(), 1.0);
        assert_eq!(parsed["b"].as_f64(), 0.0);
        assert_eq!(parsed["c"].as_f64(), 2.5);
    }

    #[test]
    fn test_band_position() {
        let band = CompetitiveBand { low: 10.0, mid: 12.0, high: 14.0 };
        assert_eq!(band.position_of(9.0), "below band");
        assert_eq!(band.position_of(14.0), "within band");
        assert_eq!(band.position_of(15.0), "above band");
    }
}

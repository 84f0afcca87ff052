//! Evaluation engine for decision briefs
//!
//! Rules-based scoring of the brief and its structured summary. Each rule
//! owns one dimension scored 0-5; the overall score is their mean.

pub mod batch;

use crate::models::{EvaluationResult, MetricValue};
use crate::tools::seed::round_to;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

pub use batch::{
    aggregate_evaluation_blob, aggregate_records, extract_record_snippets, normalize_python_literal,
    parse_record, BatchEvaluationSummary, EvaluationRecord, SnippetScan,
};

pub const MAX_DIMENSION_SCORE: f64 = 5.0;

/// Brief length outside this range costs clarity points.
pub const BRIEF_MIN_CHARS: usize = 200;
pub const BRIEF_MAX_CHARS: usize = 6000;

/// The artifacts under evaluation, pre-parsed once for every rule.
pub struct EvaluationInput<'a> {
    pub brief: &'a str,
    pub brief_lower: String,
    pub summary: Option<Value>,
}

impl<'a> EvaluationInput<'a> {
    pub fn new(brief: &'a str, summary_json: &str) -> Self {
        let summary = serde_json::from_str::<Value>(summary_json)
            .ok()
            .filter(Value::is_object);
        Self {
            brief,
            brief_lower: brief.to_lowercase(),
            summary,
        }
    }

    pub fn summary_field(&self, pointer: &str) -> Option<&Value> {
        self.summary.as_ref().and_then(|s| s.pointer(pointer))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleScore {
    pub score: f64,
    pub metrics: Vec<(&'static str, MetricValue)>,
    pub flags: Vec<String>,
}

/// Trait for evaluation rules
pub trait EvaluationRule: Send + Sync {
    /// Dimension name this rule scores.
    fn dimension(&self) -> &'static str;

    fn score(&self, input: &EvaluationInput) -> RuleScore;
}

//
// ================= Rules =================
//

/// Topic present in both the prose and the JSON mirror.
struct Topic {
    name: &'static str,
    keywords: &'static [&'static str],
    summary_pointer: &'static str,
}

const TOPICS: [Topic; 4] = [
    Topic { name: "market", keywords: &["market"], summary_pointer: "/market_summary" },
    Topic { name: "fx", keywords: &["fx", "exchange"], summary_pointer: "/fx_risk" },
    Topic { name: "margin", keywords: &["margin"], summary_pointer: "/recommended_pricing/margin_pct" },
    Topic { name: "recommendation", keywords: &["recommend"], summary_pointer: "/recommended_pricing/price" },
];

pub struct CoverageRule;

impl EvaluationRule for CoverageRule {
    fn dimension(&self) -> &'static str {
        "coverage"
    }

    fn score(&self, input: &EvaluationInput) -> RuleScore {
        let mut flags = Vec::new();
        let mut covered = 0usize;

        for topic in &TOPICS {
            let in_brief = topic.keywords.iter().any(|k| input.brief_lower.contains(k));
            let in_summary = input
                .summary_field(topic.summary_pointer)
                .map_or(false, |v| !v.is_null());
            if in_brief && in_summary {
                covered += 1;
            } else {
                flags.push(format!("missing_topic:{}", topic.name));
            }
        }

        RuleScore {
            score: MAX_DIMENSION_SCORE * covered as f64 / TOPICS.len() as f64,
            metrics: vec![("topics_covered", MetricValue::Number(covered as f64))],
            flags,
        }
    }
}

/// Recommended price, margin and FX risk stated in the prose must match
/// the structured summary.
pub struct ConsistencyRule;

impl EvaluationRule for ConsistencyRule {
    fn dimension(&self) -> &'static str {
        "consistency"
    }

    fn score(&self, input: &EvaluationInput) -> RuleScore {
        let price_consistent = input
            .summary_field("/recommended_pricing/price")
            .and_then(Value::as_f64)
            .map_or(false, |p| input.brief.contains(&format!("{:.2}", p)));

        let margin_consistent = input
            .summary_field("/recommended_pricing/margin_pct")
            .and_then(Value::as_f64)
            .map_or(false, |m| input.brief.contains(&format!("{:.1}%", m * 100.0)));

        let fx_risk_consistent = input
            .summary_field("/fx_risk/level")
            .and_then(Value::as_str)
            .map_or(false, |level| input.brief.contains(level));

        let checks = [
            ("price_consistent", price_consistent),
            ("margin_consistent", margin_consistent),
            ("fx_risk_consistent", fx_risk_consistent),
        ];
        let passed = checks.iter().filter(|(_, ok)| *ok).count();

        RuleScore {
            score: MAX_DIMENSION_SCORE * passed as f64 / checks.len() as f64,
            metrics: checks
                .iter()
                .map(|(name, ok)| (*name, MetricValue::Bool(*ok)))
                .collect(),
            flags: checks
                .iter()
                .filter(|(_, ok)| !*ok)
                .map(|(name, _)| format!("inconsistent:{}", name.trim_end_matches("_consistent")))
                .collect(),
        }
    }
}

pub struct ClarityRule;

impl EvaluationRule for ClarityRule {
    fn dimension(&self) -> &'static str {
        "clarity"
    }

    fn score(&self, input: &EvaluationInput) -> RuleScore {
        let chars = input.brief.chars().count();
        let lines = input.brief.lines().filter(|l| !l.trim().is_empty()).count();
        let mut flags = Vec::new();
        let mut score = 0.0;

        if (BRIEF_MIN_CHARS..=BRIEF_MAX_CHARS).contains(&chars) {
            score += 2.5;
        } else if chars < BRIEF_MIN_CHARS {
            flags.push("brief_too_short".to_string());
        } else {
            flags.push("brief_too_long".to_string());
        }

        if lines >= 4 {
            score += 1.5;
        } else {
            flags.push("brief_unstructured".to_string());
        }

        if input.brief.contains("{}") || input.brief.contains("NaN") {
            flags.push("unfilled_placeholder".to_string());
        } else {
            score += 1.0;
        }

        RuleScore {
            score,
            metrics: vec![("brief_chars", MetricValue::Number(chars as f64))],
            flags,
        }
    }
}

pub struct ActionabilityRule;

impl EvaluationRule for ActionabilityRule {
    fn dimension(&self) -> &'static str {
        "actionability"
    }

    fn score(&self, input: &EvaluationInput) -> RuleScore {
        let in_brief = input.brief_lower.contains("recommended action");
        let action = input
            .summary_field("/recommended_action")
            .and_then(Value::as_str)
            .filter(|a| !a.trim().is_empty());
        let names_price = match (action, input.summary_field("/recommended_pricing/price").and_then(Value::as_f64)) {
            (Some(action), Some(price)) => action.contains(&format!("{:.2}", price)),
            _ => false,
        };

        let mut score = 0.0;
        let mut flags = Vec::new();
        if in_brief {
            score += 2.5;
        } else {
            flags.push("no_action_in_brief".to_string());
        }
        if action.is_some() {
            score += 1.5;
        } else {
            flags.push("no_action_in_summary".to_string());
        }
        if names_price {
            score += 1.0;
        }

        RuleScore {
            score,
            metrics: vec![(
                "has_recommended_action",
                MetricValue::Bool(in_brief && action.is_some()),
            )],
            flags,
        }
    }
}

//
// ================= Engine =================
//

/// Evaluation engine that applies every rule
pub struct EvaluationEngine {
    rules: Vec<Box<dyn EvaluationRule>>,
}

impl EvaluationEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn EvaluationRule>) {
        self.rules.push(rule);
    }

    pub fn evaluate(&self, brief: &str, summary_json: &str) -> EvaluationResult {
        let input = EvaluationInput::new(brief, summary_json);

        let mut dimensions = BTreeMap::new();
        let mut derived_metrics = BTreeMap::new();
        let mut flags = Vec::new();

        derived_metrics.insert(
            "summary_valid_json".to_string(),
            MetricValue::Bool(input.summary.is_some()),
        );
        if input.summary.is_none() {
            flags.push("summary_not_json_object".to_string());
        }

        for rule in &self.rules {
            let result = rule.score(&input);
            let score = round_to(result.score.clamp(0.0, MAX_DIMENSION_SCORE), 2);
            dimensions.insert(rule.dimension().to_string(), score);
            for (name, value) in result.metrics {
                derived_metrics.insert(name.to_string(), value);
            }
            flags.extend(result.flags);
        }

        let overall_score = if dimensions.is_empty() {
            0.0
        } else {
            round_to(dimensions.values().sum::<f64>() / dimensions.len() as f64, 2)
        };

        let feedback = build_feedback(overall_score, &dimensions, &flags);

        info!(
            rule_count = self.rules.len(),
            overall_score,
            flag_count = flags.len(),
            "Evaluation completed"
        );

        EvaluationResult {
            overall_score,
            dimensions,
            derived_metrics,
            feedback,
            flags,
        }
    }
}

impl Default for EvaluationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn build_feedback(overall: f64, dimensions: &BTreeMap<String, f64>, flags: &[String]) -> String {
    let verdict = if overall >= 4.5 {
        "Brief is complete and consistent with its summary."
    } else if overall >= 3.0 {
        "Brief is usable but has gaps."
    } else {
        "Brief needs rework before it can be acted on."
    };

    let weakest = dimensions
        .iter()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .filter(|(_, score)| **score < MAX_DIMENSION_SCORE)
        .map(|(name, score)| format!(" Weakest dimension: {} ({:.2}).", name, score))
        .unwrap_or_default();

    if flags.is_empty() {
        format!("{}{}", verdict, weakest)
    } else {
        format!("{}{} Flags: {}.", verdict, weakest, flags.join(", "))
    }
}

/// Engine with coverage, consistency, clarity and actionability rules.
pub fn create_default_evaluation_engine() -> EvaluationEngine {
    let mut engine = EvaluationEngine::new();
    engine.add_rule(Box::new(CoverageRule));
    engine.add_rule(Box::new(ConsistencyRule));
    engine.add_rule(Box::new(ClarityRule));
    engine.add_rule(Box::new(ActionabilityRule));
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary() -> String {
        json!({
            "market_summary": {"list_price": 1400.0},
            "fx_risk": {"level": "MEDIUM"},
            "recommended_pricing": {"price": 1260.0, "margin_pct": 0.69},
            "recommended_action": "Adopt 1260.00 EUR and review FX exposure at the next pricing cycle."
        })
        .to_string()
    }

    fn brief() -> String {
        [
            "Decision brief: LaptopX in EU",
            "Market: LaptopX lists at 1400.00 EUR with a 120-unit MOQ and steady demand across the region.",
            "FX exposure: FX risk is MEDIUM with the margin moving from 69.0% to 66.0% in the worst case.",
            "Recommendation: price at 1260.00 EUR for a margin of 69.0%.",
            "Recommended action: Adopt 1260.00 EUR and review FX exposure at the next pricing cycle.",
        ]
        .join("\n")
    }

    #[test]
    fn test_consistent_brief_scores_full_marks() {
        let result = create_default_evaluation_engine().evaluate(&brief(), &summary());

        assert_eq!(result.overall_score, 5.0);
        assert_eq!(result.dimensions.len(), 4);
        assert_eq!(result.derived_metrics["price_consistent"], MetricValue::Bool(true));
        assert_eq!(result.derived_metrics["topics_covered"], MetricValue::Number(4.0));
        assert!(result.flags.is_empty());
    }

    #[test]
    fn test_price_mismatch_is_flagged() {
        let brief = brief().replace("1260.00", "1199.00");
        let result = create_default_evaluation_engine().evaluate(&brief, &summary());

        assert_eq!(result.derived_metrics["price_consistent"], MetricValue::Bool(false));
        assert!(result.dimensions["consistency"] < 5.0);
        assert!(result.flags.contains(&"inconsistent:price".to_string()));
    }

    #[test]
    fn test_invalid_summary_json() {
        let result = create_default_evaluation_engine().evaluate(&brief(), "not json");
        assert_eq!(result.derived_metrics["summary_valid_json"], MetricValue::Bool(false));
        assert_eq!(result.dimensions["consistency"], 0.0);
        assert!(result.overall_score < 3.0);
        assert!((0.0..=5.0).contains(&result.overall_score));
    }

    #[test]
    fn test_empty_engine_scores_zero() {
        let result = EvaluationEngine::new().evaluate("x", "{}");
        assert_eq!(result.overall_score, 0.0);
        assert!(result.dimensions.is_empty());
    }
}

//! Deterministic pricing and FX calculations
//!
//! Pure functions: output depends only on the arguments. Synthetic records
//! are generated from an RNG seeded by the product/region key.

use crate::error::OrchestrationError;
use crate::models::{
    CompetitiveBand, CompetitorOffer, CompetitorSnapshot, FxScenario, FxScenarioSet,
    MarginScenario, MarginScenarioSet, PriceSource, PricingRecommendation, ProductSnapshot,
    RiskLevel, DEFAULT_TARGET_MARGIN, FLOAT_EPSILON,
};
use crate::tools::seed::{round_to, seeded_rng, synthetic_epoch};
use crate::Result;
use chrono::Duration;
use rand::Rng;

/// Conventional FX shift grid (fractions, not percent).
pub const DEFAULT_FX_SHIFTS: [f64; 5] = [-0.10, -0.05, 0.0, 0.05, 0.10];

pub const DEFAULT_COMPETITORS: [&str; 5] = [
    "AlphaMart",
    "GlobalRetail",
    "BudgetBox",
    "PrimeDeal",
    "SmartWholesale",
];

const PROMO_LABELS: [&str; 4] = ["Weekend Sale", "Clearance", "Seasonal Promo", "Limited Offer"];

/// Margin erosion (percentage points) above which FX risk is at least MEDIUM.
const FX_EROSION_MEDIUM_PP: f64 = 5.0;

pub fn region_currency(region: &str) -> &'static str {
    match region.trim().to_uppercase().as_str() {
        "US" => "USD",
        "EU" => "EUR",
        "UK" => "GBP",
        "JP" => "JPY",
        "CN" => "CNY",
        "IN" => "INR",
        "APAC" => "USD",
        _ => "USD",
    }
}

fn require_key(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OrchestrationError::InvalidInput(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

fn require_positive(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(OrchestrationError::InvalidInput(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    Ok(())
}

fn require_target(target: Option<f64>) -> Result<()> {
    if let Some(t) = target {
        if !(0.0..1.0).contains(&t) {
            return Err(OrchestrationError::InvalidInput(format!(
                "target_margin must be in [0, 1), got {}",
                t
            )));
        }
    }
    Ok(())
}

//
// ================= Synthetic Snapshots =================
//

/// ERP-like product record for a product in a region.
pub fn get_product_snapshot(product_id: &str, region: &str) -> Result<ProductSnapshot> {
    require_key("product_id", product_id)?;
    require_key("region", region)?;

    let mut rng = seeded_rng(&["product", product_id, region]);

    let unit_cost = round_to(rng.gen_range(40.0..1200.0), 2);
    let list_price = round_to(unit_cost * rng.gen_range(1.3..2.0), 2);
    let moq_units = rng.gen_range(50..=500);
    let lead_time_days = rng.gen_range(14..=42);
    let age_hours: i64 = rng.gen_range(0..=24);

    Ok(ProductSnapshot {
        product_id: product_id.trim().to_string(),
        region: region.trim().to_uppercase(),
        category: "general".to_string(),
        currency: region_currency(region).to_string(),
        unit_cost,
        list_price,
        moq_units,
        lead_time_days,
        generated_at: synthetic_epoch() - Duration::hours(age_hours),
    })
}

/// Competitor offers plus the derived quartile band, quoted in `currency`.
pub fn get_competitor_price_snapshot(
    product_id: &str,
    region: &str,
    currency: &str,
) -> Result<CompetitorSnapshot> {
    require_key("product_id", product_id)?;
    require_key("region", region)?;
    require_key("currency", currency)?;

    let currency = currency.trim().to_uppercase();
    let mut rng = seeded_rng(&["competitors", product_id, region, currency.as_str()]);
    let reference_price: f64 = rng.gen_range(40.0..1600.0);

    let offers: Vec<CompetitorOffer> = DEFAULT_COMPETITORS
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let price = round_to(reference_price * rng.gen_range(0.85..1.20), 2);
            let is_promo = rng.gen_bool(0.35);
            let promo_label = if is_promo {
                Some(PROMO_LABELS[rng.gen_range(0..PROMO_LABELS.len())].to_string())
            } else {
                None
            };
            let hours_ago: i64 = rng.gen_range(0..=72);

            CompetitorOffer {
                competitor_id: format!("comp_{}", idx + 1),
                name: name.to_string(),
                price,
                currency: currency.clone(),
                is_promo,
                promo_label,
                last_seen: synthetic_epoch() - Duration::hours(hours_ago),
            }
        })
        .collect();

    let prices: Vec<f64> = offers.iter().map(|o| o.price).collect();
    let band = band_from_prices(&prices).ok_or_else(|| {
        OrchestrationError::ToolError("competitor snapshot produced no offers".to_string())
    })?;

    Ok(CompetitorSnapshot {
        product_id: product_id.trim().to_string(),
        region: region.trim().to_uppercase(),
        currency,
        offers,
        band,
    })
}

/// Linear-interpolated percentile of an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// 25th percentile / median / 75th percentile of the given prices.
pub fn band_from_prices(prices: &[f64]) -> Option<CompetitiveBand> {
    let mut sorted: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    Some(CompetitiveBand {
        low: round_to(percentile(&sorted, 0.25), 2),
        mid: round_to(percentile(&sorted, 0.5), 2),
        high: round_to(percentile(&sorted, 0.75), 2),
    })
}

//
// ================= FX Scenarios =================
//

/// Landed cost of one unit under each FX shift, relative to the 0% baseline.
pub fn calculate_fx_impact_scenarios(
    unit_cost: f64,
    purchase_currency: &str,
    reporting_currency: &str,
    fx_rate: f64,
    shifts: &[f64],
    volume: u32,
) -> Result<FxScenarioSet> {
    require_positive("unit_cost", unit_cost)?;
    require_positive("fx_rate", fx_rate)?;
    require_key("purchase_currency", purchase_currency)?;
    require_key("reporting_currency", reporting_currency)?;
    if volume == 0 {
        return Err(OrchestrationError::InvalidInput(
            "volume must be positive".to_string(),
        ));
    }

    let mut sorted: Vec<f64> = Vec::with_capacity(shifts.len());
    for &shift in shifts {
        if !shift.is_finite() || shift <= -1.0 {
            return Err(OrchestrationError::InvalidInput(format!(
                "fx shift must be greater than -100%, got {}",
                shift
            )));
        }
        sorted.push(if shift.abs() <= FLOAT_EPSILON { 0.0 } else { shift });
    }
    sorted.sort_by(f64::total_cmp);

    if sorted.windows(2).any(|w| (w[1] - w[0]).abs() <= FLOAT_EPSILON) {
        return Err(OrchestrationError::InvalidInput(
            "fx shifts must not contain duplicates".to_string(),
        ));
    }
    if !sorted.iter().any(|s| *s == 0.0) {
        return Err(OrchestrationError::InvalidInput(
            "fx shifts must include a 0% baseline".to_string(),
        ));
    }

    let baseline_landed = unit_cost * fx_rate;

    let scenarios = sorted
        .iter()
        .map(|&shift| {
            let effective_rate = fx_rate * (1.0 + shift);
            let landed_unit_cost = unit_cost * effective_rate;
            let (label, pct_change) = if shift == 0.0 {
                ("base", 0.0)
            } else if shift < 0.0 {
                ("optimistic", landed_unit_cost / baseline_landed - 1.0)
            } else {
                ("pessimistic", landed_unit_cost / baseline_landed - 1.0)
            };

            FxScenario {
                label: label.to_string(),
                fx_shift_pct: shift,
                effective_rate,
                landed_unit_cost,
                landed_total_cost: landed_unit_cost * volume as f64,
                pct_change_vs_baseline: pct_change,
            }
        })
        .collect();

    Ok(FxScenarioSet {
        purchase_currency: purchase_currency.trim().to_uppercase(),
        reporting_currency: reporting_currency.trim().to_uppercase(),
        base_rate: fx_rate,
        unit_cost,
        volume,
        scenarios,
    })
}

//
// ================= Margin Scenarios =================
//

/// One margin row per candidate price.
///
/// A price at or below cost is still emitted, flagged `viable = false`.
/// A non-positive price has no defined margin and is rejected.
pub fn plan_margin_scenarios(
    unit_cost: f64,
    candidate_prices: &[f64],
    target_margin: Option<f64>,
) -> Result<MarginScenarioSet> {
    require_positive("unit_cost", unit_cost)?;
    require_target(target_margin)?;

    let mut scenarios = Vec::with_capacity(candidate_prices.len());
    for &price in candidate_prices {
        if !price.is_finite() || price <= 0.0 {
            return Err(OrchestrationError::InvalidInput(format!(
                "candidate price must be positive, got {}",
                price
            )));
        }

        let margin_pct = (price - unit_cost) / price;
        scenarios.push(MarginScenario {
            price,
            margin_pct,
            margin_absolute: price - unit_cost,
            meets_target: target_margin.map_or(false, |t| margin_pct >= t),
            viable: price > unit_cost,
            competitiveness_note: "no competitor band".to_string(),
        });
    }

    Ok(MarginScenarioSet {
        unit_cost,
        target_margin,
        scenarios,
    })
}

/// Candidate prices to evaluate: tweaks around the current price plus the
/// competitor band anchors, falling back to cost-plus when neither exists.
pub fn candidate_prices(
    current_price: Option<f64>,
    band: Option<&CompetitiveBand>,
    landed_unit_cost: f64,
    target_margin: f64,
) -> Vec<f64> {
    let mut prices = Vec::new();

    if let Some(current) = current_price.filter(|p| p.is_finite() && *p > 0.0) {
        prices.extend([0.95, 1.0, 1.05, 1.10].iter().map(|m| current * m));
    }
    if let Some(band) = band {
        prices.extend([band.low, band.mid, band.high]);
    }
    if prices.is_empty() {
        let cost_plus = landed_unit_cost / (1.0 - target_margin);
        prices.extend([1.0, 1.05, 1.10].iter().map(|m| cost_plus * m));
    }

    let mut prices: Vec<f64> = prices
        .into_iter()
        .filter(|p| p.is_finite() && *p > 0.0)
        .map(|p| round_to(p, 2))
        .collect();
    prices.sort_by(f64::total_cmp);
    prices.dedup_by(|a, b| (*a - *b).abs() <= FLOAT_EPSILON);
    prices
}

//
// ================= Recommendation =================
//

/// Pick a single recommended price.
///
/// Candidates meeting the target inside the band win, closest to the band
/// mid. Then any candidate meeting the target. Otherwise a custom price is
/// derived from the band, cost-plus and worst-case FX cost.
pub fn build_pricing_recommendation(
    unit_cost: f64,
    competitors: Option<&CompetitorSnapshot>,
    fx_scenarios: Option<&FxScenarioSet>,
    target_margin: Option<f64>,
    candidate_prices: &[f64],
) -> Result<PricingRecommendation> {
    require_positive("unit_cost", unit_cost)?;
    require_target(target_margin)?;

    let target = target_margin.unwrap_or(DEFAULT_TARGET_MARGIN);
    let band = competitors.map(|c| &c.band);
    let margin_at = |price: f64| (price - unit_cost) / price;

    let meeting: Vec<f64> = candidate_prices
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0 && margin_at(*p) >= target)
        .collect();

    let closest_to = |pool: &[f64], anchor: f64| -> Option<f64> {
        pool.iter().copied().min_by(|a, b| {
            (a - anchor)
                .abs()
                .total_cmp(&(b - anchor).abs())
                .then(a.total_cmp(b))
        })
    };

    let mut rationale = Vec::new();

    let chosen = match band {
        Some(band) => {
            let in_band: Vec<f64> = meeting.iter().copied().filter(|p| band.contains(*p)).collect();
            if let Some(price) = closest_to(&in_band, band.mid) {
                rationale.push(format!(
                    "{:.2} meets the {:.1}% target inside the competitor band and sits closest to the {:.2} mid",
                    price,
                    target * 100.0,
                    band.mid
                ));
                Some(price)
            } else if let Some(price) = closest_to(&meeting, band.mid) {
                rationale.push(format!(
                    "no candidate meets the target inside the band; {:.2} is the closest target-meeting candidate to the {:.2} mid",
                    price, band.mid
                ));
                Some(price)
            } else {
                None
            }
        }
        None => {
            let lowest = meeting.iter().copied().reduce(f64::min);
            if let Some(price) = lowest {
                rationale.push(format!(
                    "no competitor band available; {:.2} is the lowest candidate meeting the {:.1}% target",
                    price,
                    target * 100.0
                ));
            }
            lowest
        }
    };

    let (recommended_price, price_source) = match chosen {
        Some(price) => (price, PriceSource::Candidate),
        None => {
            let cost_plus = unit_cost / (1.0 - target);
            let mut floor = cost_plus;
            let mut price = band.map_or(cost_plus, |b| b.mid);

            if let Some(band) = band {
                floor = floor.max(band.low * 0.97);
                let ceiling = band.high * 1.03;
                price = price.min(ceiling);
            }
            price = price.max(floor);

            if let Some(worst) = fx_scenarios.and_then(FxScenarioSet::worst_case) {
                let fx_floor = worst.landed_unit_cost / (1.0 - target);
                if fx_floor > price {
                    rationale.push(format!(
                        "raised to {:.2} so the worst-case FX landed cost still clears the target",
                        fx_floor
                    ));
                    price = fx_floor;
                }
            }

            let price = (price * 100.0).ceil() / 100.0;
            rationale.push(format!(
                "no candidate meets the {:.1}% target; custom price {:.2} derived from cost-plus and the competitor band",
                target * 100.0,
                price
            ));
            (price, PriceSource::Custom)
        }
    };

    let margin_at_price = margin_at(recommended_price);
    let worst_case_fx_margin = fx_scenarios
        .and_then(FxScenarioSet::worst_case)
        .map(|worst| (recommended_price - worst.landed_unit_cost) / recommended_price);

    if let Some(band) = band {
        rationale.push(format!(
            "recommended price is {} ({:.2} - {:.2})",
            band.position_of(recommended_price),
            band.low,
            band.high
        ));
    }

    Ok(PricingRecommendation {
        recommended_price,
        price_source,
        unit_cost,
        target_margin: target,
        margin_at_price,
        meets_target: margin_at_price >= target - FLOAT_EPSILON,
        competitor_min: competitors.and_then(CompetitorSnapshot::min_price),
        competitor_mean: competitors.and_then(CompetitorSnapshot::mean_price),
        competitor_max: competitors.and_then(CompetitorSnapshot::max_price),
        worst_case_fx_margin,
        rationale,
    })
}

/// FX risk of holding `price` across the scenario set.
pub fn classify_fx_risk(price: f64, fx: &FxScenarioSet, target_margin: f64) -> RiskLevel {
    let margin = |cost: f64| (price - cost) / price;

    let worst = fx.worst_case().map(|s| margin(s.landed_unit_cost));
    let base = fx.baseline().map(|s| margin(s.landed_unit_cost));

    match (worst, base) {
        (Some(worst), _) if worst < 0.0 => RiskLevel::Critical,
        (Some(worst), _) if worst < target_margin => RiskLevel::High,
        (Some(worst), Some(base)) if (base - worst) * 100.0 > FX_EROSION_MEDIUM_PP => {
            RiskLevel::Medium
        }
        _ => RiskLevel::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_snapshot_is_deterministic() {
        let a = get_product_snapshot("LaptopX", "EU").unwrap();
        let b = get_product_snapshot("LaptopX", "EU").unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert_eq!(a.currency, "EUR");
        assert!(a.list_price > a.unit_cost);
        assert!((50..=500).contains(&a.moq_units));
    }

    #[test]
    fn test_competitor_band_is_ordered() {
        let snapshot = get_competitor_price_snapshot("LaptopX", "EU", "EUR").unwrap();
        assert_eq!(snapshot.offers.len(), DEFAULT_COMPETITORS.len());
        assert!(snapshot.band.low <= snapshot.band.mid);
        assert!(snapshot.band.mid <= snapshot.band.high);
    }

    #[test]
    fn test_competitor_prices_follow_requested_currency() {
        let eur = get_competitor_price_snapshot("LaptopX", "US", "eur").unwrap();
        assert_eq!(eur.currency, "EUR");
        assert!(eur.offers.iter().all(|o| o.currency == "EUR"));

        let usd = get_competitor_price_snapshot("LaptopX", "US", "USD").unwrap();
        assert_eq!(usd.currency, "USD");
        assert!(matches!(
            get_competitor_price_snapshot("LaptopX", "US", " "),
            Err(OrchestrationError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_empty_product_rejected() {
        assert!(matches!(
            get_product_snapshot("  ", "EU"),
            Err(OrchestrationError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_band_from_prices_interpolates() {
        let band = band_from_prices(&[10.0, 20.0, 30.0, 40.0, 50.0]).unwrap();
        assert_eq!(band.low, 20.0);
        assert_eq!(band.mid, 30.0);
        assert_eq!(band.high, 40.0);
        assert!(band_from_prices(&[]).is_none());
    }

    #[test]
    fn test_fx_scenarios_have_single_baseline() {
        let set = calculate_fx_impact_scenarios(3000.0, "CNY", "EUR", 0.13, &DEFAULT_FX_SHIFTS, 1000)
            .unwrap();
        let baselines: Vec<_> = set
            .scenarios
            .iter()
            .filter(|s| s.fx_shift_pct == 0.0 && s.pct_change_vs_baseline == 0.0)
            .collect();
        assert_eq!(baselines.len(), 1);
        assert_eq!(set.scenarios.first().map(|s| s.label.as_str()), Some("optimistic"));
        assert_eq!(set.scenarios.last().map(|s| s.label.as_str()), Some("pessimistic"));

        let worst = set.worst_case().unwrap();
        assert!((worst.pct_change_vs_baseline - 0.10).abs() < FLOAT_EPSILON);
        assert!((worst.landed_total_cost - worst.landed_unit_cost * 1000.0).abs() < FLOAT_EPSILON);
    }

    #[test]
    fn test_fx_rejects_bad_shift_sets() {
        let missing_baseline = calculate_fx_impact_scenarios(10.0, "USD", "EUR", 0.9, &[-0.05, 0.05], 1);
        assert!(matches!(missing_baseline, Err(OrchestrationError::InvalidInput(_))));

        let duplicate = calculate_fx_impact_scenarios(10.0, "USD", "EUR", 0.9, &[0.0, 0.05, 0.05], 1);
        assert!(duplicate.is_err());

        let wipeout = calculate_fx_impact_scenarios(10.0, "USD", "EUR", 0.9, &[-1.0, 0.0], 1);
        assert!(wipeout.is_err());

        let bad_rate = calculate_fx_impact_scenarios(10.0, "USD", "EUR", 0.0, &[0.0], 1);
        assert!(bad_rate.is_err());
    }

    #[test]
    fn test_margin_rows_follow_formula() {
        let set = plan_margin_scenarios(390.0, &[300.0, 390.0, 520.0, 1200.0], Some(0.25)).unwrap();
        for row in &set.scenarios {
            assert!((row.margin_pct - (row.price - 390.0) / row.price).abs() < FLOAT_EPSILON);
            assert_eq!(row.meets_target, row.margin_pct >= 0.25);
        }
        assert!(!set.scenarios[0].viable);
        assert!(set.scenarios[0].margin_pct < 0.0);
        assert!(!set.scenarios[1].viable);
        assert!(set.scenarios[2].meets_target);
    }

    #[test]
    fn test_margin_rejects_non_positive_price() {
        assert!(matches!(
            plan_margin_scenarios(10.0, &[12.0, 0.0], None),
            Err(OrchestrationError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_no_target_never_meets() {
        let set = plan_margin_scenarios(10.0, &[100.0], None).unwrap();
        assert!(!set.scenarios[0].meets_target);
    }

    #[test]
    fn test_candidate_prices_are_rounded_unique_ascending() {
        let band = CompetitiveBand { low: 1140.0, mid: 1200.0, high: 1260.0 };
        let prices = candidate_prices(Some(1200.0), Some(&band), 390.0, 0.25);
        assert_eq!(prices, vec![1140.0, 1200.0, 1260.0, 1320.0]);

        let fallback = candidate_prices(None, None, 390.0, 0.25);
        assert_eq!(fallback, vec![520.0, 546.0, 572.0]);
    }

    fn snapshot_with_band(band: CompetitiveBand) -> CompetitorSnapshot {
        CompetitorSnapshot {
            product_id: "p".to_string(),
            region: "EU".to_string(),
            currency: "EUR".to_string(),
            offers: vec![],
            band,
        }
    }

    #[test]
    fn test_recommendation_prefers_in_band_closest_to_mid() {
        let competitors = snapshot_with_band(CompetitiveBand { low: 100.0, mid: 120.0, high: 140.0 });
        let rec = build_pricing_recommendation(
            50.0,
            Some(&competitors),
            None,
            Some(0.25),
            &[90.0, 110.0, 125.0, 150.0],
        )
        .unwrap();
        assert_eq!(rec.recommended_price, 125.0);
        assert_eq!(rec.price_source, PriceSource::Candidate);
        assert!(rec.meets_target);
    }

    #[test]
    fn test_recommendation_tie_goes_to_lower_price() {
        let competitors = snapshot_with_band(CompetitiveBand { low: 100.0, mid: 120.0, high: 140.0 });
        let rec = build_pricing_recommendation(50.0, Some(&competitors), None, None, &[130.0, 110.0])
            .unwrap();
        assert_eq!(rec.recommended_price, 110.0);
    }

    #[test]
    fn test_recommendation_custom_when_nothing_meets_target() {
        let competitors = snapshot_with_band(CompetitiveBand { low: 100.0, mid: 110.0, high: 120.0 });
        let rec = build_pricing_recommendation(100.0, Some(&competitors), None, Some(0.25), &[105.0, 115.0])
            .unwrap();
        assert_eq!(rec.price_source, PriceSource::Custom);
        assert!(rec.recommended_price >= 100.0 / 0.75 - FLOAT_EPSILON);
        assert!(rec.meets_target);
    }

    #[test]
    fn test_custom_price_clears_worst_fx_case() {
        let fx = calculate_fx_impact_scenarios(100.0, "USD", "EUR", 1.0, &DEFAULT_FX_SHIFTS, 10).unwrap();
        let rec = build_pricing_recommendation(100.0, None, Some(&fx), Some(0.25), &[]).unwrap();
        assert_eq!(rec.price_source, PriceSource::Custom);
        let worst_margin = rec.worst_case_fx_margin.unwrap();
        assert!(worst_margin >= 0.25 - FLOAT_EPSILON);
    }

    #[test]
    fn test_classify_fx_risk_levels() {
        let fx = calculate_fx_impact_scenarios(100.0, "USD", "EUR", 1.0, &DEFAULT_FX_SHIFTS, 1).unwrap();
        assert_eq!(classify_fx_risk(105.0, &fx, 0.25), RiskLevel::Critical);
        assert_eq!(classify_fx_risk(140.0, &fx, 0.25), RiskLevel::High);
        assert_eq!(classify_fx_risk(180.0, &fx, 0.25), RiskLevel::Medium);
        assert_eq!(classify_fx_risk(1000.0, &fx, 0.25), RiskLevel::Low);
    }
}

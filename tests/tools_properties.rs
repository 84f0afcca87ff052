//! Determinism and arithmetic properties of the pricing tools.

use fx_pricing_orchestrator::models::FLOAT_EPSILON;
use fx_pricing_orchestrator::tools::pricing::{
    calculate_fx_impact_scenarios, get_competitor_price_snapshot, get_product_snapshot,
    plan_margin_scenarios, DEFAULT_FX_SHIFTS,
};

#[test]
fn test_snapshots_are_byte_identical_across_calls() {
    for (product, region) in [("LaptopX", "EU"), ("TabletY", "US"), ("PhoneZ", "APAC")] {
        let first = serde_json::to_string(&get_product_snapshot(product, region).unwrap()).unwrap();
        let second = serde_json::to_string(&get_product_snapshot(product, region).unwrap()).unwrap();
        assert_eq!(first, second);

        let first = serde_json::to_string(&get_competitor_price_snapshot(product, region, "EUR").unwrap()).unwrap();
        let second = serde_json::to_string(&get_competitor_price_snapshot(product, region, "EUR").unwrap()).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn test_different_keys_give_different_snapshots() {
    let eu = get_product_snapshot("LaptopX", "EU").unwrap();
    let us = get_product_snapshot("LaptopX", "US").unwrap();
    assert_ne!(
        serde_json::to_string(&eu).unwrap(),
        serde_json::to_string(&us).unwrap()
    );
}

#[test]
fn test_fx_scenarios_have_exactly_one_zero_baseline() {
    let shift_sets: [&[f64]; 3] = [
        &DEFAULT_FX_SHIFTS,
        &[0.0, 0.2],
        &[-0.3, -0.15, 0.0, 0.01, 0.5],
    ];

    for shifts in shift_sets {
        let set = calculate_fx_impact_scenarios(3000.0, "CNY", "EUR", 0.13, shifts, 1000).unwrap();
        let baselines: Vec<_> = set
            .scenarios
            .iter()
            .filter(|s| s.fx_shift_pct == 0.0)
            .collect();

        assert_eq!(baselines.len(), 1);
        assert_eq!(baselines[0].pct_change_vs_baseline, 0.0);
        assert_eq!(set.scenarios.len(), shifts.len());
    }
}

#[test]
fn test_fx_shift_sets_without_baseline_or_with_duplicates_are_rejected() {
    assert!(calculate_fx_impact_scenarios(10.0, "CNY", "EUR", 0.13, &[-0.05, 0.05], 1).is_err());
    assert!(calculate_fx_impact_scenarios(10.0, "CNY", "EUR", 0.13, &[0.0, 0.05, 0.05], 1).is_err());
}

#[test]
fn test_margin_matches_formula_and_target_flag() {
    let unit_cost = 390.0;
    let prices = [350.0, 390.0, 480.0, 520.0, 1140.0, 1200.0, 1320.0];
    let target = 0.25;

    let set = plan_margin_scenarios(unit_cost, &prices, Some(target)).unwrap();
    assert_eq!(set.scenarios.len(), prices.len());

    for row in &set.scenarios {
        let expected = (row.price - unit_cost) / row.price;
        assert!((row.margin_pct - expected).abs() <= FLOAT_EPSILON);
        assert_eq!(row.meets_target, row.margin_pct >= target);
        assert_eq!(row.viable, row.price > unit_cost);
    }
}

#[test]
fn test_margin_without_target_never_meets_it() {
    let set = plan_margin_scenarios(100.0, &[150.0, 300.0], None).unwrap();
    assert!(set.scenarios.iter().all(|s| !s.meets_target));
}

#[test]
fn test_non_positive_candidate_price_is_rejected() {
    assert!(plan_margin_scenarios(100.0, &[120.0, 0.0], Some(0.2)).is_err());
}

use fx_pricing_orchestrator::{
    config::AppConfig,
    models::PricingRequestConfig,
    orchestrator::PricingOrchestrator,
    session::PricingSession,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn laptop_request() -> PricingRequestConfig {
    PricingRequestConfig::new("LaptopX", "EU", "CNY", "EUR", 1000, 3000.0)
        .with_current_price(1200.0)
        .with_target_margin(0.25)
        .with_manager_notes("Keep within the competitive band; CNY exposure is unhedged.")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        fx_provider = ?config.fx_provider,
        step_backend = ?config.step_backend,
        "FX Pricing Orchestrator starting"
    );

    let orchestrator = Arc::new(PricingOrchestrator::from_config(&config)?);
    let mut session = PricingSession::new(Arc::clone(&orchestrator), config.compaction_threshold);

    // Same request twice: the second run sees the first as prior memory.
    for round in 1..=2 {
        let result = session.submit(laptop_request()).await?;

        println!("\n=== RUN {} ({}) ===", round, result.run_id);
        println!("Final state: {}", result.final_state);

        match &result.decision_brief_text {
            Some(brief) => println!("\n{}", brief),
            None => warn!(missing = ?result.missing_inputs, "Run failed"),
        }
        if let Some(summary) = &result.structured_summary_json {
            let value: serde_json::Value = serde_json::from_str(summary)?;
            println!("\nStructured summary:\n{}", serde_json::to_string_pretty(&value)?);
        }
        if let Some(evaluation) = result.evaluation() {
            println!("\nEvaluation: {:.2}/5 - {}", evaluation.overall_score, evaluation.feedback);
        }

        let obs = &result.observability_summary;
        println!(
            "\nObservability: {} events ({} model, {} tool, {} agent), {:.1} ms total",
            obs.event_count, obs.model_calls, obs.tool_calls, obs.agent_calls, obs.total_duration_ms
        );
    }

    if let Some(memory) = orchestrator.memory() {
        println!("\n=== MEMORY ===");
        println!("{}", memory.consolidate("LaptopX", "EU", 5, 160).await);
        if let Some(metrics) = memory.aggregate_metrics("LaptopX", "EU").await {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }

    let stats = session.stats();
    info!(
        queries = stats.queries,
        errors = stats.errors,
        avg_response_ms = stats.avg_response_ms,
        "Session finished"
    );

    Ok(())
}

//! Full pipeline delegated to a live A2A server on a loopback port.

use fx_pricing_orchestrator::a2a::{create_router, A2aClient, A2aState, VENDOR_FX_SERVICE};
use fx_pricing_orchestrator::config::{AppConfig, FxProviderKind, StepBackend};
use fx_pricing_orchestrator::fx::SyntheticFxProvider;
use fx_pricing_orchestrator::models::PricingRequestConfig;
use fx_pricing_orchestrator::orchestrator::{PricingOrchestrator, RunStatus};
use std::sync::Arc;
use std::time::Duration;

async fn spawn_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(A2aState::local(Arc::new(SyntheticFxProvider)));

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_client_lists_services() {
    let url = spawn_server().await;
    let client = A2aClient::new(url, Duration::from_secs(5)).unwrap();

    let services = client.list_services().await.unwrap();
    assert!(services.iter().any(|s| s.name == VENDOR_FX_SERVICE));
    assert!(services.len() > 1);
}

#[tokio::test]
async fn test_remote_backend_completes_pipeline() {
    let url = spawn_server().await;
    let config = AppConfig {
        fx_provider: FxProviderKind::Remote,
        a2a_vendor_fx_url: Some(url.clone()),
        step_backend: StepBackend::Remote,
        a2a_agent_url: Some(url),
        step_timeout: Some(Duration::from_secs(10)),
        ..AppConfig::default()
    };

    let orchestrator = PricingOrchestrator::from_config(&config).unwrap();
    let request = PricingRequestConfig::new("LaptopX", "EU", "CNY", "EUR", 1000, 3000.0)
        .with_current_price(1200.0)
        .with_target_margin(0.25);

    let result = orchestrator.run(request).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.decision_brief_text.unwrap().contains("Recommendation"));
    assert_eq!(result.observability_summary.agent_calls, 7);
    assert_eq!(result.observability_summary.error_count, 0);
}

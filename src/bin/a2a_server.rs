use fx_pricing_orchestrator::{
    a2a::{start_server, A2aState},
    config::{AppConfig, FxProviderKind},
    fx::{provider_from_config, FxProvider, SyntheticFxProvider},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // The server is the remote end; pointing it at another A2A agent for
    // quotes would only forward calls in a loop.
    let fx_provider: Arc<dyn FxProvider> = if config.fx_provider == FxProviderKind::Remote {
        warn!("FX_PROVIDER=remote is ignored by the A2A server; serving synthetic quotes");
        Arc::new(SyntheticFxProvider)
    } else {
        provider_from_config(&config)?
    };

    let state = A2aState::local(fx_provider);
    info!(
        port = config.a2a_port,
        services = state.services().len(),
        "A2A server starting"
    );

    start_server(state, config.a2a_port).await?;
    Ok(())
}

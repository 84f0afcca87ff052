//! Agent-to-agent (A2A) surface
//!
//! A small HTTP service that exposes the vendor FX provider and the local
//! pipeline specialists, plus the client the remote FX provider and the
//! remote-agent specialists use to call it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::fx::FxProvider;
use crate::memory::MemoryEntry;
use crate::models::{FxQuoteRequest, PricingRequestConfig, StepOutput};
use crate::observability::ObservabilityCollector;
use crate::steps::{SpecialistSet, StepContext};
use crate::tools::{create_default_registry, ToolRegistry};
use crate::Result;

pub const VENDOR_FX_SERVICE: &str = "vendor-fx-quotes";

//
// ================= Wire Models =================
//

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Published description of one invokable service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct A2aServiceSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

/// Body of a remote specialist call: the run context as seen by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStepRequest {
    pub run_id: Uuid,
    pub request: PricingRequestConfig,
    #[serde(default)]
    pub outputs: BTreeMap<String, StepOutput>,
    #[serde(default)]
    pub prior_memory: Option<MemoryEntry>,
}

impl AgentStepRequest {
    pub fn from_context(ctx: &StepContext) -> Self {
        Self {
            run_id: ctx.run_id,
            request: (*ctx.request).clone(),
            outputs: ctx.outputs().clone(),
            prior_memory: ctx.prior_memory.as_deref().cloned(),
        }
    }
}

fn fx_service_spec() -> A2aServiceSpec {
    A2aServiceSpec {
        name: VENDOR_FX_SERVICE.to_string(),
        description: "Vendor FX rates for a base currency, tagged live or synthetic".to_string(),
        input_schema: json!({
            "type": "object",
            "required": ["base_currency", "target_currencies"],
            "properties": {
                "base_currency": {"type": "string"},
                "target_currencies": {"type": "array", "items": {"type": "string"}},
                "amount": {"type": "number", "exclusiveMinimum": 0}
            }
        }),
        output_schema: json!({
            "type": "object",
            "required": ["base", "as_of_date", "source", "rates"],
            "properties": {
                "base": {"type": "string"},
                "as_of_date": {"type": "string"},
                "source": {"type": "string", "enum": ["live", "synthetic"]},
                "rates": {"type": "object", "additionalProperties": {"type": "number"}},
                "converted_amounts": {"type": "object", "additionalProperties": {"type": "number"}}
            }
        }),
    }
}

fn step_service_spec(name: &str, dependencies: &[&str]) -> A2aServiceSpec {
    A2aServiceSpec {
        name: name.to_string(),
        description: format!("Pipeline specialist `{}`", name),
        input_schema: json!({
            "type": "object",
            "required": ["run_id", "request"],
            "properties": {
                "run_id": {"type": "string", "format": "uuid"},
                "request": {"type": "object"},
                "outputs": {"type": "object", "required": dependencies},
                "prior_memory": {"type": ["object", "null"]}
            }
        }),
        output_schema: json!({
            "type": "object",
            "required": ["narrative", "payload"],
            "properties": {
                "narrative": {"type": "string"},
                "payload": {"type": "object"}
            }
        }),
    }
}

//
// ================= Server =================
//

#[derive(Clone)]
pub struct A2aState {
    pub fx_provider: Arc<dyn FxProvider>,
    pub tools: Arc<ToolRegistry>,
    pub specialists: SpecialistSet,
}

impl A2aState {
    /// Serve `fx_provider` and the local specialists.
    pub fn local(fx_provider: Arc<dyn FxProvider>) -> Self {
        Self {
            tools: Arc::new(create_default_registry(Arc::clone(&fx_provider))),
            fx_provider,
            specialists: SpecialistSet::local(),
        }
    }

    pub fn services(&self) -> Vec<A2aServiceSpec> {
        let mut services = vec![fx_service_spec()];
        for name in self.specialists.names() {
            if let Some(specialist) = self.specialists.get(name) {
                services.push(step_service_spec(name, specialist.dependencies()));
            }
        }
        services
    }
}

fn error_status(err: &OrchestrationError) -> StatusCode {
    match err {
        OrchestrationError::InvalidInput(_)
        | OrchestrationError::InvalidToolInput(_)
        | OrchestrationError::SerializationError(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::StepFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::BAD_GATEWAY,
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_services(State(state): State<A2aState>) -> Json<ApiResponse> {
    Json(ApiResponse::success(state.services()))
}

async fn invoke_fx(state: &A2aState, body: Value) -> Result<Value> {
    let request: FxQuoteRequest = serde_json::from_value(body)?;
    let quote = state.fx_provider.quote(&request).await?;
    Ok(serde_json::to_value(quote)?)
}

/// Context for one remote call. Events are scoped to the request; the
/// caller keeps its own collector for the run.
fn step_context(state: &A2aState, call: AgentStepRequest) -> Result<StepContext> {
    let mut ctx = StepContext::new(
        call.run_id,
        Arc::new(call.request),
        Arc::clone(&state.tools),
        ObservabilityCollector::new(),
    )
    .with_prior_memory(call.prior_memory.map(Arc::new));

    for (output_name, output) in call.outputs {
        ctx.record(&output_name, output)?;
    }
    Ok(ctx)
}

async fn invoke_step(state: &A2aState, name: &str, body: Value) -> Result<Option<Value>> {
    let Some(specialist) = state.specialists.get(name) else {
        return Ok(None);
    };

    let call: AgentStepRequest = serde_json::from_value(body)?;
    let ctx = step_context(state, call)?;

    let missing: Vec<&str> = specialist
        .dependencies()
        .iter()
        .copied()
        .filter(|dep| !ctx.has_output(dep))
        .collect();
    if !missing.is_empty() {
        return Err(OrchestrationError::StepFailure {
            step: name.to_string(),
            message: format!("missing inputs: {}", missing.join(", ")),
        });
    }

    let output = specialist.invoke(&ctx).await?;
    let events = ctx.collector().event_count().await;
    debug!(
        service = %name,
        run_id = %ctx.run_id,
        events = events,
        "A2A step finished"
    );
    Ok(Some(serde_json::to_value(output)?))
}

async fn invoke_service(
    State(state): State<A2aState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(service = %name, "A2A invocation");

    let result = if name == VENDOR_FX_SERVICE {
        invoke_fx(&state, body).await.map(Some)
    } else {
        invoke_step(&state, &name, body).await
    };

    match result {
        Ok(Some(data)) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Unknown service: {}", name))),
        ),
        Err(e) => {
            warn!(service = %name, error = %e, "A2A invocation failed");
            (error_status(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

pub fn create_router(state: A2aState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/a2a/services", get(list_services))
        .route("/a2a/services/:name/invoke", post(invoke_service))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn start_server(state: A2aState, port: u16) -> Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("A2A server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

//
// ================= Client =================
//

#[derive(Clone)]
pub struct A2aClient {
    client: Client,
    base_url: String,
}

impl A2aClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(OrchestrationError::ConfigError(
                "A2A base URL must not be empty".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_envelope(response: reqwest::Response, what: &str) -> Result<Value> {
        let status = response.status();
        let envelope: ApiResponse = response.json().await.map_err(|e| {
            OrchestrationError::ProviderUnavailable(format!("{} returned an unreadable body ({}): {}", what, status, e))
        })?;

        if !status.is_success() || !envelope.success {
            return Err(OrchestrationError::ProviderUnavailable(format!(
                "{} failed ({}): {}",
                what,
                status,
                envelope.error.unwrap_or_else(|| "no error message".to_string())
            )));
        }

        envelope.data.ok_or_else(|| {
            OrchestrationError::ProviderUnavailable(format!("{} returned no data", what))
        })
    }

    pub async fn list_services(&self) -> Result<Vec<A2aServiceSpec>> {
        let response = self
            .client
            .get(format!("{}/a2a/services", self.base_url))
            .send()
            .await
            .map_err(|e| OrchestrationError::ProviderUnavailable(e.to_string()))?;

        let data = Self::read_envelope(response, "service listing").await?;
        Ok(serde_json::from_value(data)?)
    }

    /// POST `body` to a named service and return its `data` field.
    pub async fn invoke(&self, service: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/a2a/services/{}/invoke", self.base_url, service))
            .json(body)
            .send()
            .await
            .map_err(|e| OrchestrationError::ProviderUnavailable(format!("{}: {}", service, e)))?;

        Self::read_envelope(response, service).await
    }
}

//! Vendor FX providers
//!
//! Every provider answers the same request/response contract. Which one is
//! wired in is decided by configuration, and any live or remote provider is
//! wrapped in a fallback to the seeded synthetic generator.

use crate::a2a::{A2aClient, VENDOR_FX_SERVICE};
use crate::config::{AppConfig, FxProviderKind};
use crate::error::OrchestrationError;
use crate::models::{FxQuote, FxQuoteRequest, FxSource};
use crate::tools::seed::{round_to, seeded_rng, synthetic_epoch};
use crate::Result;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reference table for the synthetic generator. Jitter is applied on top.
const REFERENCE_RATES: [(&str, &str, f64); 10] = [
    ("CNY", "USD", 0.14),
    ("CNY", "EUR", 0.13),
    ("USD", "EUR", 0.93),
    ("EUR", "USD", 1.08),
    ("USD", "CNY", 7.1),
    ("EUR", "CNY", 7.7),
    ("GBP", "USD", 1.27),
    ("USD", "GBP", 0.79),
    ("USD", "JPY", 150.0),
    ("JPY", "USD", 0.0067),
];

#[async_trait::async_trait]
pub trait FxProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn quote(&self, request: &FxQuoteRequest) -> Result<FxQuote>;
}

fn converted(amount: Option<f64>, rates: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    match amount {
        Some(amount) => rates
            .iter()
            .map(|(currency, rate)| (currency.clone(), round_to(amount * rate, 4)))
            .collect(),
        None => BTreeMap::new(),
    }
}

//
// ================= Synthetic =================
//

/// Seeded rates; the same pair always quotes the same value.
pub fn synthetic_rate(base: &str, target: &str) -> f64 {
    let base = base.trim().to_uppercase();
    let target = target.trim().to_uppercase();
    if base == target {
        return 1.0;
    }

    let mut rng = seeded_rng(&["fx", &base, &target]);
    let reference = REFERENCE_RATES
        .iter()
        .find(|(b, t, _)| *b == base && *t == target)
        .map(|(_, _, rate)| *rate);

    let rate = match reference {
        Some(rate) => rate * (1.0 + rng.gen_range(-0.02..=0.02)),
        None => 0.6 + rng.gen_range(-0.2..0.4),
    };
    round_to(rate, 6)
}

pub struct SyntheticFxProvider;

#[async_trait::async_trait]
impl FxProvider for SyntheticFxProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn quote(&self, request: &FxQuoteRequest) -> Result<FxQuote> {
        let request = request.normalized()?;

        let rates: BTreeMap<String, f64> = request
            .target_currencies
            .iter()
            .map(|target| (target.clone(), synthetic_rate(&request.base_currency, target)))
            .collect();

        Ok(FxQuote {
            base: request.base_currency,
            as_of_date: synthetic_epoch().format("%Y-%m-%d").to_string(),
            source: FxSource::Synthetic,
            converted_amounts: converted(request.amount, &rates),
            rates,
        })
    }
}

//
// ================= Live (public currency API) =================
//

pub struct LiveFxProvider {
    client: Client,
    base_url: String,
}

impl LiveFxProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn parse_payload(base: &str, targets: &[String], body: &Value) -> Result<(String, BTreeMap<String, f64>)> {
        let date = body
            .get("date")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                OrchestrationError::ProviderUnavailable("live FX payload missing 'date'".to_string())
            })?
            .to_string();

        let table = body
            .get(base.to_lowercase())
            .and_then(Value::as_object)
            .ok_or_else(|| {
                OrchestrationError::ProviderUnavailable(format!(
                    "live FX payload missing '{}' table",
                    base.to_lowercase()
                ))
            })?;

        let mut rates = BTreeMap::new();
        for target in targets {
            let rate = table
                .get(&target.to_lowercase())
                .and_then(Value::as_f64)
                .filter(|r| r.is_finite() && *r > 0.0)
                .ok_or_else(|| {
                    OrchestrationError::ProviderUnavailable(format!(
                        "live FX payload has no usable rate for {}",
                        target
                    ))
                })?;
            rates.insert(target.clone(), rate);
        }

        Ok((date, rates))
    }
}

#[async_trait::async_trait]
impl FxProvider for LiveFxProvider {
    fn name(&self) -> &'static str {
        "live"
    }

    async fn quote(&self, request: &FxQuoteRequest) -> Result<FxQuote> {
        let request = request.normalized()?;
        let url = format!("{}/{}.json", self.base_url, request.base_currency.to_lowercase());

        debug!(url = %url, "Requesting live FX rates");

        let response = self.client.get(&url).send().await.map_err(|e| {
            OrchestrationError::ProviderUnavailable(format!("live FX request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestrationError::ProviderUnavailable(format!(
                "live FX provider returned {}",
                status
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            OrchestrationError::ProviderUnavailable(format!("live FX payload is not JSON: {}", e))
        })?;

        let (as_of_date, rates) =
            Self::parse_payload(&request.base_currency, &request.target_currencies, &body)?;

        Ok(FxQuote {
            base: request.base_currency,
            as_of_date,
            source: FxSource::Live,
            converted_amounts: converted(request.amount, &rates),
            rates,
        })
    }
}

//
// ================= Remote (A2A) =================
//

/// Delegates to the `vendor-fx-quotes` service of a remote agent.
pub struct RemoteFxProvider {
    client: A2aClient,
}

impl RemoteFxProvider {
    pub fn new(client: A2aClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl FxProvider for RemoteFxProvider {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn quote(&self, request: &FxQuoteRequest) -> Result<FxQuote> {
        let request = request.normalized()?;
        let body = serde_json::to_value(&request)?;

        let data = self
            .client
            .invoke(VENDOR_FX_SERVICE, &body)
            .await
            .map_err(|e| OrchestrationError::ProviderUnavailable(e.to_string()))?;

        serde_json::from_value(data).map_err(|e| {
            OrchestrationError::ProviderUnavailable(format!("remote FX payload malformed: {}", e))
        })
    }
}

//
// ================= Fallback =================
//

/// Tries `primary`; on `ProviderUnavailable` answers from the synthetic
/// generator instead. Input errors are never masked.
pub struct FallbackFxProvider {
    primary: Arc<dyn FxProvider>,
    fallback: SyntheticFxProvider,
}

impl FallbackFxProvider {
    pub fn new(primary: Arc<dyn FxProvider>) -> Self {
        Self {
            primary,
            fallback: SyntheticFxProvider,
        }
    }
}

#[async_trait::async_trait]
impl FxProvider for FallbackFxProvider {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    async fn quote(&self, request: &FxQuoteRequest) -> Result<FxQuote> {
        match self.primary.quote(request).await {
            Ok(quote) => Ok(quote),
            Err(OrchestrationError::ProviderUnavailable(reason)) => {
                warn!(
                    provider = self.primary.name(),
                    reason = %reason,
                    "FX provider unavailable, using synthetic rates"
                );
                self.fallback.quote(request).await
            }
            Err(other) => Err(other),
        }
    }
}

/// Build the provider selected by `FX_PROVIDER`.
pub fn provider_from_config(config: &AppConfig) -> Result<Arc<dyn FxProvider>> {
    let provider: Arc<dyn FxProvider> = match config.fx_provider {
        FxProviderKind::Synthetic => return Ok(Arc::new(SyntheticFxProvider)),
        FxProviderKind::Live => Arc::new(LiveFxProvider::new(
            config.fx_live_base_url.clone(),
            config.fx_live_timeout,
        )?),
        FxProviderKind::Remote => {
            let url = config.a2a_vendor_fx_url.clone().ok_or_else(|| {
                OrchestrationError::ConfigError("A2A_VENDOR_FX_URL is not set".to_string())
            })?;
            Arc::new(RemoteFxProvider::new(A2aClient::new(url, config.fx_live_timeout)?))
        }
    };

    Ok(Arc::new(FallbackFxProvider::new(provider)))
}

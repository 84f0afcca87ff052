//! Environment-driven configuration
//!
//! Values come from the process environment (optionally seeded from a
//! `.env` file). Loading goes through a lookup closure so tests never
//! touch the real environment.

use crate::error::OrchestrationError;
use crate::Result;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_FX_LIVE_BASE_URL: &str =
    "https://cdn.jsdelivr.net/npm/@fawazahmed0/currency-api@latest/v1/currencies";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 40;
pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;
pub const MAX_BATCH_CONCURRENCY: usize = 32;

/// Which vendor FX provider backs the FX snapshot step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxProviderKind {
    Synthetic,
    Live,
    Remote,
}

impl FromStr for FxProviderKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "synthetic" | "local" => Ok(FxProviderKind::Synthetic),
            "live" => Ok(FxProviderKind::Live),
            "remote" | "a2a" => Ok(FxProviderKind::Remote),
            other => Err(other.to_string()),
        }
    }
}

/// Which specialist variant runs the reasoning steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepBackend {
    Local,
    Gemini,
    Remote,
}

impl FromStr for StepBackend {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "local" => Ok(StepBackend::Local),
            "gemini" | "llm" => Ok(StepBackend::Gemini),
            "remote" | "a2a" => Ok(StepBackend::Remote),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub fx_provider: FxProviderKind,
    pub fx_live_base_url: String,
    pub fx_live_timeout: Duration,
    pub a2a_vendor_fx_url: Option<String>,
    pub step_backend: StepBackend,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub a2a_agent_url: Option<String>,
    pub step_timeout: Option<Duration>,
    pub compaction_threshold: usize,
    pub batch_concurrency: usize,
    pub a2a_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            fx_provider: FxProviderKind::Synthetic,
            fx_live_base_url: DEFAULT_FX_LIVE_BASE_URL.to_string(),
            fx_live_timeout: Duration::from_secs(8),
            a2a_vendor_fx_url: None,
            step_backend: StepBackend::Local,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            a2a_agent_url: None,
            step_timeout: None,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            a2a_port: 8080,
        }
    }
}

impl AppConfig {
    /// Load from the process environment after reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = read("LOG_LEVEL") {
            config.log_level = value.trim().to_string();
        }
        if let Some(value) = read("FX_PROVIDER") {
            config.fx_provider = value
                .parse()
                .map_err(|_| invalid_value("FX_PROVIDER", &value))?;
        }
        if let Some(value) = read("FX_LIVE_BASE_URL") {
            config.fx_live_base_url = value.trim().trim_end_matches('/').to_string();
        }
        if let Some(value) = read("FX_LIVE_TIMEOUT_SECS") {
            config.fx_live_timeout = Duration::from_secs(parse_u64("FX_LIVE_TIMEOUT_SECS", &value)?);
        }
        config.a2a_vendor_fx_url = read("A2A_VENDOR_FX_URL").map(|v| v.trim().to_string());
        if let Some(value) = read("STEP_BACKEND") {
            config.step_backend = value
                .parse()
                .map_err(|_| invalid_value("STEP_BACKEND", &value))?;
        }
        config.gemini_api_key = read("GEMINI_API_KEY").map(|v| v.trim().to_string());
        if let Some(value) = read("GEMINI_MODEL") {
            config.gemini_model = value.trim().to_string();
        }
        config.a2a_agent_url = read("A2A_AGENT_URL").map(|v| v.trim().to_string());
        if let Some(value) = read("STEP_TIMEOUT_SECS") {
            config.step_timeout = Some(Duration::from_secs(parse_u64("STEP_TIMEOUT_SECS", &value)?));
        }
        if let Some(value) = read("COMPACTION_THRESHOLD") {
            config.compaction_threshold = parse_u64("COMPACTION_THRESHOLD", &value)? as usize;
        }
        if let Some(value) = read("BATCH_CONCURRENCY") {
            let requested = parse_u64("BATCH_CONCURRENCY", &value)? as usize;
            config.batch_concurrency = requested.clamp(1, MAX_BATCH_CONCURRENCY);
        }
        if let Some(value) = read("A2A_PORT") {
            config.a2a_port = value
                .trim()
                .parse()
                .map_err(|_| invalid_value("A2A_PORT", &value))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fx_provider == FxProviderKind::Remote && self.a2a_vendor_fx_url.is_none() {
            return Err(OrchestrationError::ConfigError(
                "FX_PROVIDER=remote requires A2A_VENDOR_FX_URL".to_string(),
            ));
        }
        if self.step_backend == StepBackend::Remote && self.a2a_agent_url.is_none() {
            return Err(OrchestrationError::ConfigError(
                "STEP_BACKEND=remote requires A2A_AGENT_URL".to_string(),
            ));
        }
        if self.step_backend == StepBackend::Gemini && self.gemini_api_key.is_none() {
            return Err(OrchestrationError::ConfigError(
                "STEP_BACKEND=gemini requires GEMINI_API_KEY".to_string(),
            ));
        }
        if self.compaction_threshold == 0 {
            return Err(OrchestrationError::ConfigError(
                "COMPACTION_THRESHOLD must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid_value(key: &str, value: &str) -> OrchestrationError {
    OrchestrationError::ConfigError(format!("invalid value for `{}`: `{}`", key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| invalid_value(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.fx_provider, FxProviderKind::Synthetic);
        assert_eq!(config.step_backend, StepBackend::Local);
        assert_eq!(config.compaction_threshold, 40);
        assert_eq!(config.batch_concurrency, 4);
        assert_eq!(config.fx_live_timeout, Duration::from_secs(8));
        assert!(config.step_timeout.is_none());
    }

    #[test]
    fn test_batch_concurrency_is_clamped() {
        let config = AppConfig::from_lookup(lookup_from(&[("BATCH_CONCURRENCY", "500")])).unwrap();
        assert_eq!(config.batch_concurrency, MAX_BATCH_CONCURRENCY);

        let config = AppConfig::from_lookup(lookup_from(&[("BATCH_CONCURRENCY", "0")])).unwrap();
        assert_eq!(config.batch_concurrency, 1);
    }

    #[test]
    fn test_invalid_value_names_key() {
        let err = AppConfig::from_lookup(lookup_from(&[("STEP_TIMEOUT_SECS", "soon")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("STEP_TIMEOUT_SECS"));
        assert!(err.contains("soon"));
    }

    #[test]
    fn test_remote_provider_requires_url() {
        let result = AppConfig::from_lookup(lookup_from(&[("FX_PROVIDER", "remote")]));
        assert!(matches!(result, Err(OrchestrationError::ConfigError(_))));

        let config = AppConfig::from_lookup(lookup_from(&[
            ("FX_PROVIDER", "remote"),
            ("A2A_VENDOR_FX_URL", "http://localhost:8080"),
        ]))
        .unwrap();
        assert_eq!(config.fx_provider, FxProviderKind::Remote);
    }

    #[test]
    fn test_blank_values_count_as_unset() {
        let config = AppConfig::from_lookup(lookup_from(&[("GEMINI_API_KEY", "  ")])).unwrap();
        assert!(config.gemini_api_key.is_none());
    }
}

//! Error types for the FX pricing orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Step '{step}' failed: {message}")]
    StepFailure { step: String, message: String },

    #[error("Step '{step}' timed out after {timeout_ms} ms")]
    StepTimeout { step: String, timeout_ms: u64 },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Memory error: {0}")]
    MemoryError(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Wrap any error raised inside a named step as a step failure.
    ///
    /// Timeouts and existing step failures are passed through untouched so
    /// the original step name survives.
    pub fn into_step_failure(self, step: &str) -> Self {
        match self {
            err @ OrchestrationError::StepFailure { .. } => err,
            err @ OrchestrationError::StepTimeout { .. } => err,
            other => OrchestrationError::StepFailure {
                step: step.to_string(),
                message: other.to_string(),
            },
        }
    }
}

//! FX-aware Pricing Orchestrator
//!
//! Turns a product/FX pricing request into a decision brief, a structured
//! summary and a quality score by walking a fixed sequence of specialist
//! steps over deterministic pricing tools.
//!
//! PIPELINE:
//! INIT → MARKET_RESEARCH → COMPETITIVE_PRICING → FX_SNAPSHOT → FX_IMPACT
//! → MARGIN_PLANNING → DECISION_BRIEF → EVALUATION → DONE | FAILED

pub mod a2a;
pub mod batch;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod execution;
pub mod fx;
pub mod gemini;
pub mod memory;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod session;
pub mod state;
pub mod steps;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use orchestrator::{PipelineResult, PricingOrchestrator, RunStatus};

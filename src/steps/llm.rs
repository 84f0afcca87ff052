//! LLM-backed specialists
//!
//! Wraps a local specialist: the inner step computes the payload, the model
//! writes the prose. The computed figures are appended verbatim under the
//! model's text so the narrative can never disagree with the payload.

use super::{Specialist, StepContext};
use crate::gemini::GeminiClient;
use crate::models::{PricingRequestConfig, StepOutput};
use crate::observability::EventKind;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a pricing analyst writing for a product manager. \
Write at most two short paragraphs of plain prose. Use only the figures in the JSON you are given; \
never invent prices, margins or rates.";

pub struct GeminiSpecialist {
    inner: Arc<dyn Specialist>,
    client: Arc<GeminiClient>,
}

impl GeminiSpecialist {
    pub fn new(inner: Arc<dyn Specialist>, client: Arc<GeminiClient>) -> Self {
        Self { inner, client }
    }
}

fn build_prompt(step: &str, request: &PricingRequestConfig, payload: &Value) -> String {
    format!(
        "Step: {}\nProduct: {} ({}) in {}\nReporting currency: {}\nManager notes: {}\n\nStep output JSON:\n{}",
        step,
        request.product_id,
        request.category,
        request.region,
        request.reporting_currency,
        request.manager_notes.as_deref().unwrap_or("none"),
        payload
    )
}

#[async_trait::async_trait]
impl Specialist for GeminiSpecialist {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn dependencies(&self) -> &'static [&'static str] {
        self.inner.dependencies()
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput> {
        let computed = self.inner.invoke(ctx).await?;
        let prompt = build_prompt(self.name(), &ctx.request, &computed.payload);

        let text = ctx
            .collector()
            .observe(
                ctx.run_id,
                EventKind::ModelCall,
                self.client.model(),
                self.client.generate(SYSTEM_PROMPT, &prompt),
            )
            .await?;

        Ok(StepOutput::new(
            format!("{}\n\nComputed figures:\n{}", text.trim(), computed.narrative),
            computed.payload,
        ))
    }
}

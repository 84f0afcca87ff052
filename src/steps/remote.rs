//! Remote-agent specialists
//!
//! Ships the run context to a remote A2A agent and reads back its
//! `(narrative, payload)` answer.

use super::{Specialist, StepContext};
use crate::a2a::{A2aClient, AgentStepRequest};
use crate::error::OrchestrationError;
use crate::models::StepOutput;
use crate::Result;
use tracing::debug;

pub struct RemoteAgentSpecialist {
    name: &'static str,
    dependencies: &'static [&'static str],
    client: A2aClient,
}

impl RemoteAgentSpecialist {
    pub fn new(name: &'static str, dependencies: &'static [&'static str], client: A2aClient) -> Self {
        Self {
            name,
            dependencies,
            client,
        }
    }
}

#[async_trait::async_trait]
impl Specialist for RemoteAgentSpecialist {
    fn name(&self) -> &'static str {
        self.name
    }

    fn dependencies(&self) -> &'static [&'static str] {
        self.dependencies
    }

    async fn invoke(&self, ctx: &StepContext) -> Result<StepOutput> {
        let body = serde_json::to_value(AgentStepRequest::from_context(ctx))?;

        debug!(
            run_id = %ctx.run_id,
            step = self.name,
            agent = %self.client.base_url(),
            "delegating step to remote agent"
        );

        let data = self.client.invoke(self.name, &body).await?;

        serde_json::from_value(data).map_err(|e| OrchestrationError::StepFailure {
            step: self.name.to_string(),
            message: format!("remote agent answered with an unreadable step output: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::SyntheticFxProvider;
    use crate::models::PricingRequestConfig;
    use crate::observability::ObservabilityCollector;
    use crate::steps::FX_IMPACT;
    use crate::tools::create_default_registry;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_unreachable_agent_is_an_error() {
        let client = A2aClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let specialist = RemoteAgentSpecialist::new(FX_IMPACT, &[], client);

        let ctx = StepContext::new(
            Uuid::new_v4(),
            Arc::new(PricingRequestConfig::new("p", "EU", "CNY", "EUR", 1, 1.0)),
            Arc::new(create_default_registry(Arc::new(SyntheticFxProvider))),
            ObservabilityCollector::new(),
        );

        assert!(specialist.invoke(&ctx).await.is_err());
        assert_eq!(specialist.name(), FX_IMPACT);
    }
}

//! MindAgent: periodic bounded inference

use super::{Agent, AgentCore, AgentState, AgentStats};
use crate::cancel::CancelToken;
use crate::error::CoreResult;
use crate::inference::InferenceEngine;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Iteration cap for one scheduled inference burst.
const RUN_ITERATIONS: usize = 5;

/// Drives the tenant's inference engine a bounded number of iterations on
/// every scheduled run.
pub struct MindAgent {
    id: String,
    tenant_id: String,
    priority: i32,
    core: AgentCore,
    engine: Arc<InferenceEngine>,
}

impl MindAgent {
    pub fn new(tenant_id: &str, engine: Arc<InferenceEngine>) -> Self {
        Self {
            id: format!("mind-{}", tenant_id),
            tenant_id: tenant_id.to_string(),
            priority: 10,
            core: AgentCore::new(),
            engine,
        }
    }
}

#[async_trait]
impl Agent for MindAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "MindAgent"
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn state(&self) -> AgentState {
        self.core.state()
    }

    fn set_state(&self, state: AgentState) {
        self.core.set_state(state);
    }

    async fn run(&self, token: &CancelToken) -> CoreResult<()> {
        let started = Instant::now();
        let derived = self.engine.run(token, RUN_ITERATIONS).await?;
        debug!(
            agent = %self.id,
            new_atoms = derived.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "mind agent run complete"
        );
        Ok(())
    }

    fn stats(&self) -> AgentStats {
        self.core.stats()
    }

    fn record_run(&self, elapsed: Duration) {
        self.core.record_run(elapsed);
    }
}

//! Autonomous agents and their scheduler

mod attention;
mod executor;
mod mind;

pub use attention::AttentionAgent;
pub use executor::{AgentExecutor, AgentInfo};
pub use mind::MindAgent;

use crate::cancel::CancelToken;
use crate::error::CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Idle,
    Running,
    Stopped,
    Error,
}

/// Per-agent execution statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    pub run_count: u64,
    pub total_time_ms: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub avg_time_ms: f64,
}

/// An autonomous task invoked periodically by the executor.
///
/// Implementations embed an [`AgentCore`] for state and stats bookkeeping;
/// the executor drives `set_state` and `record_run` around each run.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn tenant_id(&self) -> &str;

    /// Higher priority runs earlier within a tick.
    fn priority(&self) -> i32 {
        0
    }

    fn state(&self) -> AgentState;

    fn set_state(&self, state: AgentState);

    /// One bounded execution. The token is cancelled on executor shutdown;
    /// the hard per-run deadline is enforced by the executor.
    async fn run(&self, token: &CancelToken) -> CoreResult<()>;

    fn stats(&self) -> AgentStats;

    fn record_run(&self, elapsed: Duration);
}

/// Shared state/stats block embedded by agent implementations.
pub struct AgentCore {
    state: RwLock<AgentState>,
    stats: RwLock<AgentStats>,
}

impl AgentCore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AgentState::Idle),
            stats: RwLock::new(AgentStats::default()),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    pub fn set_state(&self, state: AgentState) {
        *self.state.write() = state;
    }

    pub fn stats(&self) -> AgentStats {
        self.stats.read().clone()
    }

    pub fn record_run(&self, elapsed: Duration) {
        let mut stats = self.stats.write();
        stats.run_count += 1;
        stats.total_time_ms += elapsed.as_millis() as u64;
        stats.last_run = Some(Utc::now());
        stats.avg_time_ms = stats.total_time_ms as f64 / stats.run_count as f64;
    }
}

impl Default for AgentCore {
    fn default() -> Self {
        Self::new()
    }
}

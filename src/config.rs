//! Runtime configuration
//!
//! Loading hierarchy: env > defaults. All knobs can be overridden with
//! `MINDSPACE_*` environment variables.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the cognitive core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Number of atomspace shards.
    pub num_shards: usize,
    /// Worker tasks per shard draining the request channels.
    pub workers_per_shard: usize,
    /// Worker tasks per tenant inference engine.
    pub inference_workers: usize,
    /// Worker tasks executing agent runs.
    pub agent_workers: usize,
    /// Worker tasks executing pipelines.
    pub pipeline_workers: usize,
    /// Capacity of each bounded request queue.
    pub queue_capacity: usize,
    /// Agent scheduler tick, in milliseconds.
    pub agent_tick_ms: u64,
    /// Hard per-run deadline for a single agent execution, in milliseconds.
    pub agent_run_timeout_ms: u64,
    /// Rebalance monitor interval, in seconds.
    pub rebalance_interval_secs: u64,
    /// Load spread between the most and least loaded shard that triggers
    /// an advisory rebalance pass.
    pub rebalance_threshold: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            num_shards: 8,
            workers_per_shard: 4,
            inference_workers: 16,
            agent_workers: 8,
            pipeline_workers: 8,
            queue_capacity: 1000,
            agent_tick_ms: 100,
            agent_run_timeout_ms: 5000,
            rebalance_interval_secs: 30,
            rebalance_threshold: 1000,
        }
    }
}

impl CoreConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> CoreResult<()> {
        if self.num_shards == 0 {
            return Err(CoreError::InvalidInput("num_shards must be >= 1".into()));
        }
        if self.workers_per_shard == 0
            || self.inference_workers == 0
            || self.agent_workers == 0
            || self.pipeline_workers == 0
        {
            return Err(CoreError::InvalidInput(
                "worker pool sizes must be >= 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(CoreError::InvalidInput("queue_capacity must be >= 1".into()));
        }
        if self.agent_tick_ms == 0 {
            return Err(CoreError::InvalidInput("agent_tick_ms must be >= 1".into()));
        }
        Ok(())
    }

    /// Apply `MINDSPACE_*` environment overrides on top of defaults.
    pub fn from_env() -> CoreResult<Self> {
        let mut config = Self::default();
        apply_env(&mut config.num_shards, "MINDSPACE_NUM_SHARDS")?;
        apply_env(&mut config.workers_per_shard, "MINDSPACE_WORKERS_PER_SHARD")?;
        apply_env(&mut config.inference_workers, "MINDSPACE_INFERENCE_WORKERS")?;
        apply_env(&mut config.agent_workers, "MINDSPACE_AGENT_WORKERS")?;
        apply_env(&mut config.pipeline_workers, "MINDSPACE_PIPELINE_WORKERS")?;
        apply_env(&mut config.queue_capacity, "MINDSPACE_QUEUE_CAPACITY")?;
        apply_env(&mut config.agent_tick_ms, "MINDSPACE_AGENT_TICK_MS")?;
        apply_env(
            &mut config.agent_run_timeout_ms,
            "MINDSPACE_AGENT_RUN_TIMEOUT_MS",
        )?;
        apply_env(
            &mut config.rebalance_interval_secs,
            "MINDSPACE_REBALANCE_INTERVAL_SECS",
        )?;
        apply_env(
            &mut config.rebalance_threshold,
            "MINDSPACE_REBALANCE_THRESHOLD",
        )?;
        config.validate()?;
        Ok(config)
    }

    pub fn agent_tick(&self) -> Duration {
        Duration::from_millis(self.agent_tick_ms)
    }

    pub fn agent_run_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_run_timeout_ms)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }
}

fn apply_env<T: std::str::FromStr>(slot: &mut T, key: &str) -> CoreResult<()> {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .parse()
            .map_err(|_| CoreError::InvalidInput(format!("invalid {}: {}", key, raw)))?;
    }
    Ok(())
}

//! Staged cognitive pipelines

mod orchestrator;
mod stages;

pub use orchestrator::PipelineOrchestrator;
pub use stages::{
    AgentExecutionStage, AtomIngestionStage, AttentionAllocationStage, InferenceStage,
};

use crate::agents::AgentExecutor;
use crate::atom::Atom;
use crate::atomspace::TenantAtomSpace;
use crate::cancel::CancelToken;
use crate::error::{CoreError, CoreResult};
use crate::inference::InferenceEngine;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Created,
    Running,
    Completed,
    Failed,
    Paused,
}

/// Value threaded from stage to stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineData {
    Empty,
    Atoms(Vec<Atom>),
    Json(serde_json::Value),
}

impl PipelineData {
    pub fn atoms(&self) -> Option<&[Atom]> {
        match self {
            PipelineData::Atoms(atoms) => Some(atoms),
            _ => None,
        }
    }
}

/// Tenant-scoped services a stage may use.
#[derive(Clone)]
pub struct StageContext {
    pub space: TenantAtomSpace,
    pub engine: Arc<InferenceEngine>,
    pub agents: Arc<AgentExecutor>,
    pub token: CancelToken,
}

/// One step of a pipeline: consumes the previous stage's output, produces
/// the next stage's input.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &StageContext, input: PipelineData) -> CoreResult<PipelineData>;
}

/// Duration of one completed stage within the latest execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: u64,
}

/// Serializable snapshot of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub state: PipelineState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stages: Vec<String>,
    pub last_timings: Vec<StageTiming>,
}

/// Ordered sequence of stages over one tenant's atomspace.
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
    state: RwLock<PipelineState>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    completed_at: RwLock<Option<DateTime<Utc>>>,
    stages: RwLock<Vec<Arc<dyn PipelineStage>>>,
    last_timings: RwLock<Vec<StageTiming>>,
}

impl Pipeline {
    pub fn new(id: &str, name: &str, tenant_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
            created_at: Utc::now(),
            state: RwLock::new(PipelineState::Created),
            started_at: RwLock::new(None),
            completed_at: RwLock::new(None),
            stages: RwLock::new(Vec::new()),
            last_timings: RwLock::new(Vec::new()),
        }
    }

    pub fn add_stage(&self, stage: Arc<dyn PipelineStage>) {
        self.stages.write().push(stage);
    }

    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    pub fn info(&self) -> PipelineInfo {
        PipelineInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            tenant_id: self.tenant_id.clone(),
            state: self.state(),
            created_at: self.created_at,
            started_at: *self.started_at.read(),
            completed_at: *self.completed_at.read(),
            stages: self
                .stages
                .read()
                .iter()
                .map(|s| s.name().to_string())
                .collect(),
            last_timings: self.last_timings.read().clone(),
        }
    }

    /// Walk the stages in order, threading each stage's output into the
    /// next. A stage error fails the pipeline; earlier stages' side
    /// effects are not rolled back. Cancellation (or expiry of the
    /// token's deadline) between stages also fails the pipeline.
    pub async fn execute(
        &self,
        ctx: &StageContext,
        input: PipelineData,
    ) -> CoreResult<PipelineData> {
        let run_id = uuid::Uuid::new_v4();
        debug!(pipeline = %self.id, %run_id, "pipeline execution started");
        self.set_state(PipelineState::Running);
        *self.started_at.write() = Some(Utc::now());
        self.last_timings.write().clear();

        if ctx.token.is_cancelled() {
            self.fail();
            return Err(ctx.token.cancel_error());
        }
        let stages: Vec<Arc<dyn PipelineStage>> = self.stages.read().clone();
        let mut data = input;
        for stage in stages {
            if ctx.token.is_cancelled() {
                self.fail();
                return Err(ctx.token.cancel_error());
            }
            let started = Instant::now();
            match stage.execute(ctx, data).await {
                Ok(output) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    debug!(
                        pipeline = %self.id,
                        %run_id,
                        stage = stage.name(),
                        elapsed_ms,
                        "stage complete"
                    );
                    self.last_timings.write().push(StageTiming {
                        stage: stage.name().to_string(),
                        elapsed_ms,
                    });
                    data = output;
                }
                Err(err) => {
                    self.fail();
                    return Err(CoreError::stage_failed(stage.name(), &err));
                }
            }
        }

        self.set_state(PipelineState::Completed);
        *self.completed_at.write() = Some(Utc::now());
        Ok(data)
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.write() = state;
    }

    fn fail(&self) {
        self.set_state(PipelineState::Failed);
        *self.completed_at.write() = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::sharding::ShardManager;

    pub(crate) fn context(tenant: &str) -> StageContext {
        let config = CoreConfig {
            num_shards: 2,
            workers_per_shard: 2,
            inference_workers: 4,
            agent_workers: 2,
            queue_capacity: 64,
            agent_tick_ms: 10_000,
            ..Default::default()
        };
        let manager = Arc::new(ShardManager::new(&config));
        let space = TenantAtomSpace::new(tenant, manager);
        StageContext {
            engine: Arc::new(InferenceEngine::with_default_rules(space.clone(), &config)),
            agents: Arc::new(AgentExecutor::new(&config)),
            space,
            token: CancelToken::new(),
        }
    }

    struct FailingStage;

    #[async_trait]
    impl PipelineStage for FailingStage {
        fn name(&self) -> &str {
            "failing"
        }
        async fn execute(
            &self,
            _ctx: &StageContext,
            _input: PipelineData,
        ) -> CoreResult<PipelineData> {
            Err(CoreError::InvalidInput("intentional".into()))
        }
    }

    struct PassthroughStage;

    #[async_trait]
    impl PipelineStage for PassthroughStage {
        fn name(&self) -> &str {
            "passthrough"
        }
        async fn execute(
            &self,
            _ctx: &StageContext,
            input: PipelineData,
        ) -> CoreResult<PipelineData> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_pipeline_completes_and_records_timings() {
        let ctx = context("demo");
        let pipeline = Pipeline::new("p1", "test", "demo");
        pipeline.add_stage(Arc::new(PassthroughStage));
        pipeline.add_stage(Arc::new(PassthroughStage));

        let out = pipeline.execute(&ctx, PipelineData::Empty).await.unwrap();
        assert!(matches!(out, PipelineData::Empty));
        assert_eq!(pipeline.state(), PipelineState::Completed);

        let info = pipeline.info();
        assert_eq!(info.stages.len(), 2);
        assert_eq!(info.last_timings.len(), 2);
        assert!(info.started_at.is_some());
        assert!(info.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stage_error_fails_pipeline_and_skips_rest() {
        let ctx = context("demo");
        let pipeline = Pipeline::new("p1", "test", "demo");
        pipeline.add_stage(Arc::new(PassthroughStage));
        pipeline.add_stage(Arc::new(FailingStage));
        pipeline.add_stage(Arc::new(PassthroughStage));

        let err = pipeline
            .execute(&ctx, PipelineData::Empty)
            .await
            .unwrap_err();
        match err {
            CoreError::StageFailed { stage, .. } => assert_eq!(stage, "failing"),
            other => panic!("expected StageFailed, got {other:?}"),
        }
        assert_eq!(pipeline.state(), PipelineState::Failed);
        // Only the stage before the failure ran.
        assert_eq!(pipeline.info().last_timings.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_fails() {
        let ctx = context("demo");
        ctx.token.cancel();
        let pipeline = Pipeline::new("p1", "test", "demo");
        pipeline.add_stage(Arc::new(PassthroughStage));

        assert!(matches!(
            pipeline.execute(&ctx, PipelineData::Empty).await,
            Err(CoreError::Cancelled)
        ));
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }
}

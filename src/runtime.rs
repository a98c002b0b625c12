//! Cognitive runtime facade
//!
//! Bundles the shard manager, the per-tenant inference engines, the agent
//! executor, and the pipeline orchestrator behind one entry point. The
//! outer HTTP surface talks to this type only.

use crate::agents::{AgentExecutor, AgentInfo, MindAgent};
use crate::atom::Atom;
use crate::atomspace::TenantAtomSpace;
use crate::cancel::CancelToken;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::inference::InferenceEngine;
use crate::pipeline::{
    AgentExecutionStage, AttentionAllocationStage, InferenceStage, Pipeline, PipelineData,
    PipelineInfo, PipelineOrchestrator, PipelineStage, StageContext,
};
use crate::shard::{AtomMutator, AtomPredicate};
use crate::sharding::{ShardManager, TenantStats};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument};

/// Iteration cap used by the default pipeline's inference stage.
const DEFAULT_PIPELINE_ITERATIONS: usize = 5;

/// Liveness summary of the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub num_tenants: usize,
    pub num_shards: usize,
    pub timestamp: DateTime<Utc>,
}

/// Full statistics surface for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub config: CoreConfig,
    pub sharding: TenantStats,
    pub agents: Vec<AgentInfo>,
    pub pipelines: Vec<PipelineInfo>,
    pub tenant: String,
}

/// The core's public entry point.
pub struct CognitiveRuntime {
    config: CoreConfig,
    shards: Arc<ShardManager>,
    engines: DashMap<String, Arc<InferenceEngine>>,
    agents: Arc<AgentExecutor>,
    pipelines: Arc<PipelineOrchestrator>,
    closed: AtomicBool,
}

impl CognitiveRuntime {
    /// Build the runtime and start every worker pool.
    pub fn new(config: CoreConfig) -> CoreResult<Self> {
        config.validate()?;
        let shards = Arc::new(ShardManager::new(&config));
        let agents = Arc::new(AgentExecutor::new(&config));
        let pipelines = Arc::new(PipelineOrchestrator::new(&config));
        info!(num_shards = config.num_shards, "cognitive runtime started");
        Ok(Self {
            config,
            shards,
            engines: DashMap::new(),
            agents,
            pipelines,
            closed: AtomicBool::new(false),
        })
    }

    /// Create the tenant's engine (with the default rules) and its
    /// MindAgent. Re-initialization fails.
    #[instrument(skip(self))]
    pub async fn initialize_tenant(&self, tenant_id: &str) -> CoreResult<()> {
        self.ensure_open()?;
        if tenant_id.is_empty() {
            return Err(CoreError::InvalidInput("tenant id must not be empty".into()));
        }

        let space = TenantAtomSpace::new(tenant_id, self.shards.clone());
        let engine = {
            match self.engines.entry(tenant_id.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(CoreError::AlreadyExists(format!("tenant {}", tenant_id)))
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let engine =
                        Arc::new(InferenceEngine::with_default_rules(space, &self.config));
                    slot.insert(engine.clone());
                    engine
                }
            }
        };

        let agent = Arc::new(MindAgent::new(tenant_id, engine.clone()));
        if let Err(err) = self.agents.register(agent).await {
            // Roll the tenant back so a retry starts clean.
            self.engines.remove(tenant_id);
            engine.close();
            return Err(err);
        }

        info!(tenant = %tenant_id, "tenant initialized");
        Ok(())
    }

    /// Tenant-scoped atomspace handle.
    pub fn atomspace(&self, tenant_id: &str) -> TenantAtomSpace {
        TenantAtomSpace::new(tenant_id, self.shards.clone())
    }

    pub async fn add_atom(&self, atom: Atom) -> CoreResult<()> {
        self.shards.add_atom(atom).await
    }

    pub async fn get_atom(&self, id: &str, tenant_id: &str) -> CoreResult<Atom> {
        self.shards.get_atom(id, tenant_id).await
    }

    pub async fn query_atoms(
        &self,
        tenant_id: &str,
        predicate: Option<AtomPredicate>,
    ) -> CoreResult<Vec<Atom>> {
        self.shards.query_atoms(tenant_id, predicate).await
    }

    pub async fn update_atom(
        &self,
        id: &str,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> CoreResult<Atom> {
        self.shards.update_atom(id, tenant_id, mutator).await
    }

    pub async fn delete_atom(&self, id: &str, tenant_id: &str) -> CoreResult<()> {
        self.shards.delete_atom(id, tenant_id).await
    }

    /// Build and insert a ConceptNode.
    pub async fn create_concept_node(&self, name: &str, tenant_id: &str) -> CoreResult<Atom> {
        let atom = Atom::concept(name, tenant_id)?;
        self.shards.add_atom(atom.clone()).await?;
        Ok(atom)
    }

    /// Build and insert an InheritanceLink after verifying both endpoints
    /// exist and belong to the tenant.
    pub async fn create_inheritance_link(
        &self,
        source_id: &str,
        target_id: &str,
        tenant_id: &str,
    ) -> CoreResult<Atom> {
        self.shards.get_atom(source_id, tenant_id).await?;
        self.shards.get_atom(target_id, tenant_id).await?;
        let atom = Atom::inheritance(source_id, target_id, tenant_id)?;
        self.shards.add_atom(atom.clone()).await?;
        Ok(atom)
    }

    /// Run the tenant's inference engine to a bounded fixpoint.
    ///
    /// Pass a [`CancelToken::with_timeout`] token to bound the run by a
    /// deadline; expiry surfaces as `DeadlineExceeded`, explicit
    /// cancellation as `Cancelled`.
    pub async fn run_inference(
        &self,
        token: &CancelToken,
        tenant_id: &str,
        max_iterations: usize,
    ) -> CoreResult<Vec<Atom>> {
        self.ensure_open()?;
        let engine = self.engine(tenant_id)?;
        engine.run(token, max_iterations).await
    }

    pub async fn register_agent(&self, agent: Arc<dyn crate::agents::Agent>) -> CoreResult<()> {
        self.agents.register(agent).await
    }

    pub async fn unregister_agent(&self, id: &str) -> CoreResult<()> {
        self.agents.unregister(id).await
    }

    pub fn get_agent(&self, id: &str) -> CoreResult<Arc<dyn crate::agents::Agent>> {
        self.agents.get_agent(id)
    }

    pub fn get_agents_by_tenant(&self, tenant_id: &str) -> Vec<Arc<dyn crate::agents::Agent>> {
        self.agents.agents_by_tenant(tenant_id)
    }

    pub fn create_pipeline(
        &self,
        id: &str,
        name: &str,
        tenant_id: &str,
    ) -> CoreResult<Arc<Pipeline>> {
        self.pipelines.create_pipeline(id, name, tenant_id)
    }

    pub fn add_pipeline_stage(&self, id: &str, stage: Arc<dyn PipelineStage>) -> CoreResult<()> {
        self.pipelines.add_stage(id, stage)
    }

    pub fn get_pipeline(&self, id: &str) -> CoreResult<Arc<Pipeline>> {
        self.pipelines.get_pipeline(id)
    }

    pub fn delete_pipeline(&self, id: &str) -> CoreResult<()> {
        self.pipelines.delete_pipeline(id)
    }

    /// The canonical three-stage pipeline: inference, attention
    /// allocation, agent execution.
    pub fn create_default_pipeline(&self, tenant_id: &str) -> CoreResult<Arc<Pipeline>> {
        self.engine(tenant_id)?;
        let pipeline = self.pipelines.create_pipeline(
            &format!("default-{}", tenant_id),
            "Default Cognitive Pipeline",
            tenant_id,
        )?;
        pipeline.add_stage(Arc::new(InferenceStage::new(DEFAULT_PIPELINE_ITERATIONS)));
        pipeline.add_stage(Arc::new(AttentionAllocationStage));
        pipeline.add_stage(Arc::new(AgentExecutionStage));
        Ok(pipeline)
    }

    /// Execute a pipeline under the owning tenant's context.
    ///
    /// The token (deadline-armed or plain) flows into every stage; on
    /// cancellation or expiry the pipeline transitions to `Failed`.
    pub async fn execute_pipeline(
        &self,
        token: &CancelToken,
        id: &str,
        input: PipelineData,
    ) -> CoreResult<PipelineData> {
        self.ensure_open()?;
        let pipeline = self.pipelines.get_pipeline(id)?;
        let engine = self.engine(&pipeline.tenant_id)?;
        let ctx = StageContext {
            space: self.atomspace(&pipeline.tenant_id),
            engine,
            agents: self.agents.clone(),
            token: token.clone(),
        };
        self.pipelines.execute(id, ctx, input).await
    }

    /// Aggregate statistics for one tenant.
    pub async fn get_stats(&self, tenant_id: &str) -> CoreResult<RuntimeStats> {
        self.ensure_open()?;
        Ok(RuntimeStats {
            config: self.config.clone(),
            sharding: self.shards.tenant_stats(tenant_id).await?,
            agents: self.agents.agent_infos(tenant_id),
            pipelines: self.pipelines.pipeline_infos(tenant_id),
            tenant: tenant_id.to_string(),
        })
    }

    pub fn health(&self) -> Health {
        Health {
            status: if self.closed.load(Ordering::SeqCst) {
                "shutdown".to_string()
            } else {
                "healthy".to_string()
            },
            num_tenants: self.engines.len(),
            num_shards: self.shards.num_shards(),
            timestamp: Utc::now(),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Tear down every worker pool. A second close is a no-op.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            for entry in self.engines.iter() {
                entry.value().close();
            }
            self.agents.close();
            self.pipelines.close();
            self.shards.close();
            info!("cognitive runtime closed");
        }
    }

    fn engine(&self, tenant_id: &str) -> CoreResult<Arc<InferenceEngine>> {
        self.engines
            .get(tenant_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::NotFound(format!("tenant {} not initialized", tenant_id)))
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::Closed);
        }
        Ok(())
    }
}

impl Drop for CognitiveRuntime {
    fn drop(&mut self) {
        self.close();
    }
}

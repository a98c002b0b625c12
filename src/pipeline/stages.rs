//! Built-in pipeline stages

use super::{PipelineData, PipelineStage, StageContext};
use crate::agents::AgentState;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

/// Bulk-inserts the incoming atoms into the tenant's atomspace. Atoms that
/// already exist are silently skipped; the input flows through unchanged.
pub struct AtomIngestionStage;

#[async_trait]
impl PipelineStage for AtomIngestionStage {
    fn name(&self) -> &str {
        "atom_ingestion"
    }

    async fn execute(&self, ctx: &StageContext, input: PipelineData) -> CoreResult<PipelineData> {
        let atoms = match &input {
            PipelineData::Atoms(atoms) => atoms.clone(),
            PipelineData::Empty => Vec::new(),
            PipelineData::Json(_) => {
                return Err(CoreError::InvalidInput(
                    "atom ingestion expects an atom collection".into(),
                ))
            }
        };

        let mut inserted = 0usize;
        for atom in atoms {
            match ctx.space.add_atom(atom).await {
                Ok(()) => inserted += 1,
                Err(CoreError::AlreadyExists(_)) => {}
                Err(err) => return Err(err),
            }
        }
        debug!(tenant = ctx.space.tenant_id(), inserted, "ingestion complete");
        Ok(input)
    }
}

/// Runs the tenant's inference engine with a configurable iteration cap
/// and emits the newly derived atoms.
pub struct InferenceStage {
    max_iterations: usize,
}

impl InferenceStage {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }
}

#[async_trait]
impl PipelineStage for InferenceStage {
    fn name(&self) -> &str {
        "inference"
    }

    async fn execute(&self, ctx: &StageContext, _input: PipelineData) -> CoreResult<PipelineData> {
        let derived = ctx.engine.run(&ctx.token, self.max_iterations).await?;
        Ok(PipelineData::Atoms(derived))
    }
}

const ATTENTION_BOOST_STI: i16 = 5;
const ATTENTION_DECAY: f64 = 0.95;
const ATTENTION_CONFIDENCE_FLOOR: f64 = 0.8;

/// Boosts confident atoms, then decays short-term importance across the
/// tenant. Emits the updated atom set.
pub struct AttentionAllocationStage;

#[async_trait]
impl PipelineStage for AttentionAllocationStage {
    fn name(&self) -> &str {
        "attention_allocation"
    }

    async fn execute(&self, ctx: &StageContext, _input: PipelineData) -> CoreResult<PipelineData> {
        let atoms = ctx.space.query_all().await?;
        let mut updated = Vec::with_capacity(atoms.len());
        for atom in atoms {
            if ctx.token.is_cancelled() {
                return Err(ctx.token.cancel_error());
            }
            let mut attention = atom.attention_value;
            if atom.truth_value.confidence > ATTENTION_CONFIDENCE_FLOOR {
                attention = attention.boosted(ATTENTION_BOOST_STI, 0);
            }
            attention = attention.decayed(ATTENTION_DECAY);
            match ctx.space.set_attention_value(&atom.id, attention).await {
                Ok(atom) => updated.push(atom),
                Err(CoreError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(PipelineData::Atoms(updated))
    }
}

/// Invokes every agent of the tenant sequentially. A failing agent is
/// marked and logged but does not abort the stage; the input passes
/// through unchanged.
pub struct AgentExecutionStage;

#[async_trait]
impl PipelineStage for AgentExecutionStage {
    fn name(&self) -> &str {
        "agent_execution"
    }

    async fn execute(&self, ctx: &StageContext, input: PipelineData) -> CoreResult<PipelineData> {
        let agents = ctx.agents.agents_by_tenant(ctx.space.tenant_id());
        for agent in agents {
            if ctx.token.is_cancelled() {
                return Err(ctx.token.cancel_error());
            }
            agent.set_state(AgentState::Running);
            let started = Instant::now();
            match agent.run(&ctx.token).await {
                Ok(()) => {
                    agent.record_run(started.elapsed());
                    agent.set_state(AgentState::Idle);
                }
                Err(err) => {
                    warn!(agent = agent.id(), %err, "agent failed during pipeline stage");
                    agent.set_state(AgentState::Error);
                }
            }
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::pipeline::tests::context;
    use crate::types::{AtomType, TruthValue};

    #[tokio::test]
    async fn test_ingestion_skips_duplicates() {
        let ctx = context("demo");
        let cat = Atom::concept("Cat", "demo").unwrap();
        let atoms = vec![cat.clone(), cat.clone(), Atom::concept("Dog", "demo").unwrap()];

        let stage = AtomIngestionStage;
        let out = stage
            .execute(&ctx, PipelineData::Atoms(atoms))
            .await
            .unwrap();
        // Input flows through even though one duplicate was skipped.
        assert_eq!(out.atoms().unwrap().len(), 3);
        assert_eq!(ctx.space.query_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ingestion_rejects_json_input() {
        let ctx = context("demo");
        let stage = AtomIngestionStage;
        assert!(matches!(
            stage
                .execute(&ctx, PipelineData::Json(serde_json::json!({"k": "v"})))
                .await,
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_inference_stage_outputs_new_atoms() {
        let ctx = context("demo");
        let cat = Atom::concept("Cat", "demo").unwrap();
        let mammal = Atom::concept("Mammal", "demo").unwrap();
        let animal = Atom::concept("Animal", "demo").unwrap();
        for atom in [&cat, &mammal, &animal] {
            ctx.space.add_atom(atom.clone()).await.unwrap();
        }
        ctx.space
            .add_atom(Atom::inheritance(&cat.id, &mammal.id, "demo").unwrap())
            .await
            .unwrap();
        ctx.space
            .add_atom(Atom::inheritance(&mammal.id, &animal.id, "demo").unwrap())
            .await
            .unwrap();

        let stage = InferenceStage::new(5);
        let out = stage.execute(&ctx, PipelineData::Empty).await.unwrap();
        let derived = out.atoms().unwrap();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].atom_type, AtomType::InheritanceLink);
    }

    #[tokio::test]
    async fn test_attention_allocation_boosts_confident_atoms() {
        let ctx = context("demo");
        let confident = Atom::concept("Confident", "demo").unwrap();
        let doubtful = Atom::concept("Doubtful", "demo")
            .unwrap()
            .with_truth(TruthValue::new(0.9, 0.5).unwrap());
        ctx.space.add_atom(confident.clone()).await.unwrap();
        ctx.space.add_atom(doubtful.clone()).await.unwrap();

        let stage = AttentionAllocationStage;
        let out = stage.execute(&ctx, PipelineData::Empty).await.unwrap();
        assert_eq!(out.atoms().unwrap().len(), 2);

        // Confident: (0 + 5) * 0.95 floored = 4. Doubtful: 0 stays 0.
        let confident_after = ctx.space.get_atom(&confident.id).await.unwrap();
        assert_eq!(confident_after.attention_value.sti, 4);
        let doubtful_after = ctx.space.get_atom(&doubtful.id).await.unwrap();
        assert_eq!(doubtful_after.attention_value.sti, 0);
    }
}

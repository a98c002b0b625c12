//! AttentionAgent: short-term importance maintenance

use super::{Agent, AgentCore, AgentState, AgentStats};
use crate::atomspace::TenantAtomSpace;
use crate::cancel::CancelToken;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const DECAY_FACTOR: f64 = 0.95;
const BOOST_STI: i16 = 10;
const BOOST_LTI: i16 = 1;
const BOOST_STRENGTH_FLOOR: f64 = 0.8;
const BOOST_CONFIDENCE_FLOOR: f64 = 0.8;

/// Decays every atom's short-term importance and boosts atoms whose truth
/// is both strong and confident.
pub struct AttentionAgent {
    id: String,
    tenant_id: String,
    priority: i32,
    core: AgentCore,
    space: TenantAtomSpace,
}

impl AttentionAgent {
    pub fn new(tenant_id: &str, space: TenantAtomSpace) -> Self {
        Self {
            id: format!("attention-{}", tenant_id),
            tenant_id: tenant_id.to_string(),
            priority: 5,
            core: AgentCore::new(),
            space,
        }
    }
}

#[async_trait]
impl Agent for AttentionAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "AttentionAgent"
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
        let atoms = self.space.query_all().await?;
        let mut touched = 0usize;
        for atom in atoms {
            if token.is_cancelled() {
                return Err(token.cancel_error());
            }
            let mut attention = atom.attention_value.decayed(DECAY_FACTOR);
            if atom.truth_value.strength > BOOST_STRENGTH_FLOOR
                && atom.truth_value.confidence > BOOST_CONFIDENCE_FLOOR
            {
                attention = attention.boosted(BOOST_STI, BOOST_LTI);
            }
            if attention != atom.attention_value {
                // Deleted concurrently is fine; skip and move on.
                match self.space.set_attention_value(&atom.id, attention).await {
                    Ok(_) => touched += 1,
                    Err(CoreError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        debug!(agent = %self.id, touched, "attention sweep complete");
        Ok(())
    }

    fn stats(&self) -> AgentStats {
        self.core.stats()
    }

    fn record_run(&self, elapsed: Duration) {
        self.core.record_run(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::config::CoreConfig;
    use crate::sharding::ShardManager;
    use crate::types::{AttentionValue, TruthValue};
    use std::sync::Arc;

    fn space() -> TenantAtomSpace {
        let config = CoreConfig {
            num_shards: 2,
            workers_per_shard: 2,
            queue_capacity: 64,
            ..Default::default()
        };
        TenantAtomSpace::new("demo", Arc::new(ShardManager::new(&config)))
    }

    #[tokio::test]
    async fn test_decay_and_boost() {
        let space = space();

        let mut strong = Atom::concept("Strong", "demo").unwrap();
        strong.attention_value = AttentionValue {
            sti: 100,
            lti: 0,
            vlti: 0,
        };
        let weak = Atom::concept("Weak", "demo")
            .unwrap()
            .with_truth(TruthValue::new(0.1, 0.1).unwrap());
        space.add_atom(strong.clone()).await.unwrap();
        space.add_atom(weak.clone()).await.unwrap();
        space
            .set_attention_value(
                &weak.id,
                AttentionValue {
                    sti: 100,
                    lti: 0,
                    vlti: 0,
                },
            )
            .await
            .unwrap();

        let agent = AttentionAgent::new("demo", space.clone());
        agent.run(&CancelToken::new()).await.unwrap();

        // Strong truth: decayed then boosted.
        let strong_after = space.get_atom(&strong.id).await.unwrap();
        assert_eq!(strong_after.attention_value.sti, 95 + 10);
        assert_eq!(strong_after.attention_value.lti, 1);

        // Weak truth: decay only.
        let weak_after = space.get_atom(&weak.id).await.unwrap();
        assert_eq!(weak_after.attention_value.sti, 95);
        assert_eq!(weak_after.attention_value.lti, 0);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_stops() {
        let space = space();
        space
            .add_atom(Atom::concept("Cat", "demo").unwrap())
            .await
            .unwrap();
        let agent = AttentionAgent::new("demo", space);
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            agent.run(&token).await,
            Err(CoreError::Cancelled)
        ));
    }
}

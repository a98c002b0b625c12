//! Tenant-scoped view over the sharded atomspace
//!
//! Every consumer above the shard manager (inference engines, agents,
//! pipeline stages) works through this wrapper, which bakes the tenant id
//! into each call so tenant isolation cannot be bypassed by accident.

use crate::atom::Atom;
use crate::error::{CoreError, CoreResult};
use crate::shard::{AtomMutator, AtomPredicate};
use crate::sharding::{ShardManager, TenantStats};
use crate::types::{AttentionValue, TruthValue};
use std::sync::Arc;

/// Handle to one tenant's slice of the atomspace. Cheap to clone.
#[derive(Clone)]
pub struct TenantAtomSpace {
    tenant_id: String,
    manager: Arc<ShardManager>,
}

impl TenantAtomSpace {
    pub fn new(tenant_id: &str, manager: Arc<ShardManager>) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            manager,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Insert an atom belonging to this tenant.
    pub async fn add_atom(&self, atom: Atom) -> CoreResult<()> {
        if atom.tenant_id != self.tenant_id {
            return Err(CoreError::InvalidInput(format!(
                "atom tenant {} does not match view tenant {}",
                atom.tenant_id, self.tenant_id
            )));
        }
        self.manager.add_atom(atom).await
    }

    pub async fn get_atom(&self, id: &str) -> CoreResult<Atom> {
        self.manager.get_atom(id, &self.tenant_id).await
    }

    pub async fn query_atoms(&self, predicate: Option<AtomPredicate>) -> CoreResult<Vec<Atom>> {
        self.manager.query_atoms(&self.tenant_id, predicate).await
    }

    /// All atoms visible to this tenant.
    pub async fn query_all(&self) -> CoreResult<Vec<Atom>> {
        self.query_atoms(None).await
    }

    pub async fn update_atom(&self, id: &str, mutator: AtomMutator) -> CoreResult<Atom> {
        self.manager.update_atom(id, &self.tenant_id, mutator).await
    }

    pub async fn delete_atom(&self, id: &str) -> CoreResult<()> {
        self.manager.delete_atom(id, &self.tenant_id).await
    }

    /// Replace an atom's truth value.
    pub async fn set_truth_value(&self, id: &str, truth_value: TruthValue) -> CoreResult<Atom> {
        self.update_atom(id, Box::new(move |atom| atom.truth_value = truth_value))
            .await
    }

    /// Replace an atom's attention value.
    pub async fn set_attention_value(
        &self,
        id: &str,
        attention_value: AttentionValue,
    ) -> CoreResult<Atom> {
        self.update_atom(
            id,
            Box::new(move |atom| atom.attention_value = attention_value),
        )
        .await
    }

    pub async fn stats(&self) -> CoreResult<TenantStats> {
        self.manager.tenant_stats(&self.tenant_id).await
    }
}

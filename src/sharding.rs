//! Shard manager: hash routing, cross-shard fan-out, rebalance monitor
//!
//! Atoms are distributed over N shards by `fnv1a64(tenant ":" id) mod N`.
//! Tenant-wide queries fan out to every shard concurrently and concatenate
//! the per-shard results. A monitor task periodically inspects shard loads
//! and publishes an advisory rebalance report; atoms are never migrated,
//! which keeps the routing function the single source of lookup truth.

use crate::atom::Atom;
use crate::cancel::CancelToken;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::shard::{AtomMutator, AtomPredicate, AtomShard, ShardTenantStats};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over a byte slice.
pub fn fnv1a64(data: &[u8]) -> u64 {
    data.iter()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ *byte as u64).wrapping_mul(FNV_PRIME))
}

/// Aggregated statistics for one tenant across every shard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantStats {
    pub tenant_id: String,
    pub total_atoms: usize,
    pub atoms_by_type: HashMap<String, usize>,
    /// Atom count per shard, keyed `shard-<index>`.
    pub shard_distribution: HashMap<String, usize>,
}

/// Outcome of one advisory rebalance pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub timestamp: DateTime<Utc>,
    pub max_load: u64,
    pub min_load: u64,
    pub spread: u64,
    pub overloaded: Vec<usize>,
    pub underloaded: Vec<usize>,
    pub triggered: bool,
}

/// Routes atoms to shards and fans out tenant-wide operations.
pub struct ShardManager {
    shards: Vec<Arc<AtomShard>>,
    rebalance_threshold: u64,
    last_rebalance: Arc<RwLock<Option<RebalanceReport>>>,
    shutdown: CancelToken,
    closed: AtomicBool,
}

impl ShardManager {
    /// Create the shard set and start the rebalance monitor.
    pub fn new(config: &CoreConfig) -> Self {
        let shards: Vec<Arc<AtomShard>> = (0..config.num_shards)
            .map(|i| Arc::new(AtomShard::new(i, config.workers_per_shard, config.queue_capacity)))
            .collect();

        let shutdown = CancelToken::new();
        let last_rebalance = Arc::new(RwLock::new(None));

        let manager = Self {
            shards,
            rebalance_threshold: config.rebalance_threshold,
            last_rebalance: last_rebalance.clone(),
            shutdown: shutdown.clone(),
            closed: AtomicBool::new(false),
        };

        manager.spawn_rebalance_monitor(config.rebalance_interval());
        info!(num_shards = config.num_shards, "shard manager started");
        manager
    }

    fn spawn_rebalance_monitor(&self, interval: std::time::Duration) {
        let shards = self.shards.clone();
        let threshold = self.rebalance_threshold;
        let report_slot = self.last_rebalance.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the monitor
            // observes a settled system.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = Self::evaluate_rebalance(&shards, threshold);
                        if report.triggered {
                            warn!(
                                spread = report.spread,
                                overloaded = ?report.overloaded,
                                underloaded = ?report.underloaded,
                                "shard load imbalance detected; advisory only"
                            );
                            *report_slot.write() = Some(report);
                        } else {
                            debug!(spread = report.spread, "shard loads balanced");
                        }
                    }
                }
            }
        });
    }

    fn evaluate_rebalance(shards: &[Arc<AtomShard>], threshold: u64) -> RebalanceReport {
        let loads: Vec<u64> = shards.iter().map(|s| s.load()).collect();
        let max_load = loads.iter().copied().max().unwrap_or(0);
        let min_load = loads.iter().copied().min().unwrap_or(0);
        let spread = max_load - min_load;
        let triggered = spread > threshold;

        let mean = loads.iter().sum::<u64>() / loads.len().max(1) as u64;
        let margin = threshold / 2;
        let (mut overloaded, mut underloaded) = (Vec::new(), Vec::new());
        if triggered {
            for (i, load) in loads.iter().enumerate() {
                if *load > mean.saturating_add(margin) {
                    overloaded.push(i);
                } else if *load + margin < mean {
                    underloaded.push(i);
                }
            }
        }

        RebalanceReport {
            timestamp: Utc::now(),
            max_load,
            min_load,
            spread,
            overloaded,
            underloaded,
            triggered,
        }
    }

    /// Shard responsible for `(atom_id, tenant_id)`.
    fn shard_for(&self, atom_id: &str, tenant_id: &str) -> &Arc<AtomShard> {
        let key = format!("{}:{}", tenant_id, atom_id);
        let index = (fnv1a64(key.as_bytes()) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    pub async fn add_atom(&self, atom: Atom) -> CoreResult<()> {
        self.ensure_open()?;
        self.shard_for(&atom.id, &atom.tenant_id).add_atom(atom).await
    }

    pub async fn get_atom(&self, id: &str, tenant_id: &str) -> CoreResult<Atom> {
        self.ensure_open()?;
        self.shard_for(id, tenant_id).get_atom(id, tenant_id).await
    }

    pub async fn update_atom(
        &self,
        id: &str,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> CoreResult<Atom> {
        self.ensure_open()?;
        self.shard_for(id, tenant_id)
            .update_atom(id, tenant_id, mutator)
            .await
    }

    pub async fn delete_atom(&self, id: &str, tenant_id: &str) -> CoreResult<()> {
        self.ensure_open()?;
        self.shard_for(id, tenant_id).delete_atom(id, tenant_id).await
    }

    /// Query every shard concurrently and concatenate the results. Order
    /// across shards is unspecified.
    pub async fn query_atoms(
        &self,
        tenant_id: &str,
        predicate: Option<AtomPredicate>,
    ) -> CoreResult<Vec<Atom>> {
        self.ensure_open()?;
        let queries = self
            .shards
            .iter()
            .map(|shard| shard.query_atoms(tenant_id, predicate.clone()));
        let per_shard = join_all(queries).await;

        let mut atoms = Vec::new();
        for result in per_shard {
            atoms.extend(result?);
        }
        Ok(atoms)
    }

    /// Aggregate tenant statistics across every shard.
    pub async fn tenant_stats(&self, tenant_id: &str) -> CoreResult<TenantStats> {
        self.ensure_open()?;
        let queries = self.shards.iter().map(|shard| shard.stats(tenant_id));
        let per_shard: Vec<CoreResult<ShardTenantStats>> = join_all(queries).await;

        let mut stats = TenantStats {
            tenant_id: tenant_id.to_string(),
            ..Default::default()
        };
        for (index, result) in per_shard.into_iter().enumerate() {
            let shard_stats = result?;
            stats.total_atoms += shard_stats.total_atoms;
            for (atom_type, count) in shard_stats.atoms_by_type {
                *stats.atoms_by_type.entry(atom_type).or_insert(0) += count;
            }
            stats
                .shard_distribution
                .insert(format!("shard-{}", index), shard_stats.total_atoms);
        }
        Ok(stats)
    }

    /// Latest advisory rebalance report, if any pass has triggered.
    pub fn last_rebalance(&self) -> Option<RebalanceReport> {
        self.last_rebalance.read().clone()
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Stop the monitor and every shard worker pool. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            for shard in &self.shards {
                shard.close();
            }
            info!("shard manager closed");
        }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(num_shards: usize) -> ShardManager {
        let config = CoreConfig {
            num_shards,
            workers_per_shard: 2,
            queue_capacity: 64,
            ..Default::default()
        };
        ShardManager::new(&config)
    }

    #[test]
    fn test_fnv1a64_known_vectors() {
        // Standard FNV-1a test vectors.
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a64(b"foobar"), 0x85944171f73967e8);
    }

    #[tokio::test]
    async fn test_routing_is_deterministic() {
        let manager = manager(8);
        let atom = Atom::concept("Cat", "demo").unwrap();
        manager.add_atom(atom.clone()).await.unwrap();

        // Lookups route to the same shard the add went to.
        let fetched = manager.get_atom(&atom.id, "demo").await.unwrap();
        assert_eq!(fetched.id, atom.id);
        manager.close();
    }

    #[tokio::test]
    async fn test_cross_shard_query_is_complete() {
        let manager = manager(8);
        let mut ids = Vec::new();
        for i in 0..50 {
            let atom = Atom::concept(&format!("Concept-{}", i), "demo").unwrap();
            ids.push(atom.id.clone());
            manager.add_atom(atom).await.unwrap();
        }

        let atoms = manager.query_atoms("demo", None).await.unwrap();
        assert_eq!(atoms.len(), 50);
        let mut seen: Vec<String> = atoms.into_iter().map(|a| a.id).collect();
        seen.sort();
        ids.sort();
        assert_eq!(seen, ids);
        manager.close();
    }

    #[tokio::test]
    async fn test_tenant_stats_aggregation() {
        let manager = manager(4);
        for i in 0..20 {
            manager
                .add_atom(Atom::concept(&format!("C-{}", i), "demo").unwrap())
                .await
                .unwrap();
        }

        let stats = manager.tenant_stats("demo").await.unwrap();
        assert_eq!(stats.total_atoms, 20);
        assert_eq!(stats.atoms_by_type["ConceptNode"], 20);
        let distributed: usize = stats.shard_distribution.values().sum();
        assert_eq!(distributed, 20);
        manager.close();
    }

    #[tokio::test]
    async fn test_single_shard_behaves_like_unsharded_store() {
        let manager = manager(1);
        let atom = Atom::concept("Cat", "demo").unwrap();
        manager.add_atom(atom.clone()).await.unwrap();
        assert_eq!(manager.query_atoms("demo", None).await.unwrap().len(), 1);
        manager.delete_atom(&atom.id, "demo").await.unwrap();
        assert!(manager.query_atoms("demo", None).await.unwrap().is_empty());
        manager.close();
    }

    #[tokio::test]
    async fn test_rebalance_evaluation() {
        let manager = manager(2);
        for i in 0..30 {
            manager
                .add_atom(Atom::concept(&format!("C-{}", i), "demo").unwrap())
                .await
                .unwrap();
        }
        let report = ShardManager::evaluate_rebalance(&manager.shards, 5);
        assert_eq!(report.max_load + report.min_load, 30);
        if report.spread > 5 {
            assert!(report.triggered);
        }
        let quiet = ShardManager::evaluate_rebalance(&manager.shards, 1000);
        assert!(!quiet.triggered);
        assert!(quiet.overloaded.is_empty());
        manager.close();
    }

    #[tokio::test]
    async fn test_closed_manager_rejects_operations() {
        let manager = manager(2);
        manager.close();
        manager.close();
        assert!(matches!(
            manager.query_atoms("demo", None).await,
            Err(CoreError::Closed)
        ));
    }
}

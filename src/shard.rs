//! A single atomspace shard
//!
//! Each shard owns a disjoint subset of atoms and serves them through a
//! bounded, multiplexed request surface: one channel per operation kind
//! (add, query, update, delete), drained by a small worker pool. Workers
//! share the underlying indices behind a reader-writer lock, so concurrent
//! queries proceed in parallel while mutations serialize.

use crate::atom::Atom;
use crate::cancel::CancelToken;
use crate::error::{CoreError, CoreResult};
use crate::types::AtomType;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Filter applied to atoms during a query.
pub type AtomPredicate = Arc<dyn Fn(&Atom) -> bool + Send + Sync>;

/// In-place mutation applied to an atom under the shard's write lock. The
/// mutator may change truth, attention, and name; id, type, and tenant are
/// restored by the shard if touched.
pub type AtomMutator = Box<dyn FnOnce(&mut Atom) + Send>;

/// Per-tenant statistics reported by one shard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardTenantStats {
    pub total_atoms: usize,
    pub atoms_by_type: HashMap<String, usize>,
}

struct AddRequest {
    atom: Atom,
    reply: oneshot::Sender<CoreResult<()>>,
}

enum QueryRequest {
    Get {
        id: String,
        tenant_id: String,
        reply: oneshot::Sender<CoreResult<Atom>>,
    },
    Query {
        tenant_id: String,
        predicate: Option<AtomPredicate>,
        reply: oneshot::Sender<CoreResult<Vec<Atom>>>,
    },
    Stats {
        tenant_id: String,
        reply: oneshot::Sender<CoreResult<ShardTenantStats>>,
    },
}

struct UpdateRequest {
    id: String,
    tenant_id: String,
    mutator: AtomMutator,
    reply: oneshot::Sender<CoreResult<Atom>>,
}

struct DeleteRequest {
    id: String,
    tenant_id: String,
    reply: oneshot::Sender<CoreResult<()>>,
}

/// Indexed in-memory store behind the shard's request surface.
struct ShardState {
    atoms: HashMap<String, Atom>,
    by_tenant: HashMap<String, HashSet<String>>,
    by_type: HashMap<AtomType, HashSet<String>>,
    by_name: HashMap<String, HashSet<String>>,
    load: u64,
    last_used: DateTime<Utc>,
}

impl ShardState {
    fn new() -> Self {
        Self {
            atoms: HashMap::new(),
            by_tenant: HashMap::new(),
            by_type: HashMap::new(),
            by_name: HashMap::new(),
            load: 0,
            last_used: Utc::now(),
        }
    }

    fn insert(&mut self, atom: Atom) -> CoreResult<()> {
        if self.atoms.contains_key(&atom.id) {
            return Err(CoreError::AlreadyExists(format!("atom {}", atom.id)));
        }
        self.by_tenant
            .entry(atom.tenant_id.clone())
            .or_default()
            .insert(atom.id.clone());
        self.by_type
            .entry(atom.atom_type)
            .or_default()
            .insert(atom.id.clone());
        self.by_name
            .entry(atom.name.clone())
            .or_default()
            .insert(atom.id.clone());
        self.atoms.insert(atom.id.clone(), atom);
        self.load += 1;
        self.last_used = Utc::now();
        Ok(())
    }

    fn remove(&mut self, id: &str, tenant_id: &str) -> CoreResult<()> {
        let atom = self
            .atoms
            .remove(id)
            .ok_or_else(|| CoreError::NotFound(format!("atom {}", id)))?;
        if atom.tenant_id != tenant_id {
            // Wrong tenant: put it back untouched.
            self.atoms.insert(atom.id.clone(), atom);
            return Err(CoreError::TenantMismatch { id: id.to_string() });
        }
        Self::unindex(&mut self.by_tenant, &atom.tenant_id, id);
        Self::unindex(&mut self.by_type, &atom.atom_type, id);
        Self::unindex(&mut self.by_name, &atom.name, id);
        self.load = self.load.saturating_sub(1);
        self.last_used = Utc::now();
        Ok(())
    }

    fn unindex<K: std::hash::Hash + Eq>(
        index: &mut HashMap<K, HashSet<String>>,
        key: &K,
        id: &str,
    ) {
        if let Some(bucket) = index.get_mut(key) {
            bucket.remove(id);
            if bucket.is_empty() {
                index.remove(key);
            }
        }
    }
}

/// One of N atomspace shards.
pub struct AtomShard {
    index: usize,
    add_tx: flume::Sender<AddRequest>,
    query_tx: flume::Sender<QueryRequest>,
    update_tx: flume::Sender<UpdateRequest>,
    delete_tx: flume::Sender<DeleteRequest>,
    state: Arc<RwLock<ShardState>>,
    shutdown: CancelToken,
    closed: AtomicBool,
}

impl AtomShard {
    /// Create a shard and spawn its worker pool.
    pub fn new(index: usize, workers: usize, queue_capacity: usize) -> Self {
        let (add_tx, add_rx) = flume::bounded(queue_capacity);
        let (query_tx, query_rx) = flume::bounded(queue_capacity);
        let (update_tx, update_rx) = flume::bounded(queue_capacity);
        let (delete_tx, delete_rx) = flume::bounded(queue_capacity);

        let state = Arc::new(RwLock::new(ShardState::new()));
        let shutdown = CancelToken::new();

        for _ in 0..workers.max(1) {
            let state = state.clone();
            let add_rx = add_rx.clone();
            let query_rx = query_rx.clone();
            let update_rx = update_rx.clone();
            let delete_rx = delete_rx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                Self::worker_loop(state, add_rx, query_rx, update_rx, delete_rx, shutdown).await;
            });
        }

        Self {
            index,
            add_tx,
            query_tx,
            update_tx,
            delete_tx,
            state,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    async fn worker_loop(
        state: Arc<RwLock<ShardState>>,
        add_rx: flume::Receiver<AddRequest>,
        query_rx: flume::Receiver<QueryRequest>,
        update_rx: flume::Receiver<UpdateRequest>,
        delete_rx: flume::Receiver<DeleteRequest>,
        shutdown: CancelToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                req = add_rx.recv_async() => match req {
                    Ok(req) => Self::handle_add(&state, req),
                    Err(_) => break,
                },
                req = query_rx.recv_async() => match req {
                    Ok(req) => Self::handle_query(&state, req),
                    Err(_) => break,
                },
                req = update_rx.recv_async() => match req {
                    Ok(req) => Self::handle_update(&state, req),
                    Err(_) => break,
                },
                req = delete_rx.recv_async() => match req {
                    Ok(req) => Self::handle_delete(&state, req),
                    Err(_) => break,
                },
            }
        }
    }

    fn handle_add(state: &RwLock<ShardState>, req: AddRequest) {
        let result = state.write().insert(req.atom);
        let _ = req.reply.send(result);
    }

    fn handle_query(state: &RwLock<ShardState>, req: QueryRequest) {
        match req {
            QueryRequest::Get {
                id,
                tenant_id,
                reply,
            } => {
                let guard = state.read();
                let result = match guard.atoms.get(&id) {
                    None => Err(CoreError::NotFound(format!("atom {}", id))),
                    Some(atom) if atom.tenant_id != tenant_id => {
                        Err(CoreError::TenantMismatch { id })
                    }
                    Some(atom) => Ok(atom.clone()),
                };
                drop(guard);
                let _ = reply.send(result);
            }
            QueryRequest::Query {
                tenant_id,
                predicate,
                reply,
            } => {
                let guard = state.read();
                let atoms = guard
                    .by_tenant
                    .get(&tenant_id)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| guard.atoms.get(id))
                            .filter(|atom| predicate.as_ref().map_or(true, |p| p(atom)))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                drop(guard);
                let _ = reply.send(Ok(atoms));
            }
            QueryRequest::Stats { tenant_id, reply } => {
                let guard = state.read();
                let mut stats = ShardTenantStats::default();
                if let Some(ids) = guard.by_tenant.get(&tenant_id) {
                    stats.total_atoms = ids.len();
                    for id in ids {
                        if let Some(atom) = guard.atoms.get(id) {
                            *stats
                                .atoms_by_type
                                .entry(atom.atom_type.as_str().to_string())
                                .or_insert(0) += 1;
                        }
                    }
                }
                drop(guard);
                let _ = reply.send(Ok(stats));
            }
        }
    }

    fn handle_update(state: &RwLock<ShardState>, req: UpdateRequest) {
        let mut guard = state.write();
        let result = match guard.atoms.get_mut(&req.id) {
            None => Err(CoreError::NotFound(format!("atom {}", req.id))),
            Some(atom) if atom.tenant_id != req.tenant_id => {
                Err(CoreError::TenantMismatch { id: req.id.clone() })
            }
            Some(atom) => {
                let frozen_id = atom.id.clone();
                let frozen_type = atom.atom_type;
                let frozen_tenant = atom.tenant_id.clone();
                (req.mutator)(atom);
                if atom.id != frozen_id || atom.atom_type != frozen_type {
                    debug!(atom = %frozen_id, "mutator touched immutable fields; restoring");
                }
                atom.id = frozen_id;
                atom.atom_type = frozen_type;
                atom.tenant_id = frozen_tenant;
                atom.updated_at = Utc::now();
                atom.revision += 1;
                Ok(atom.clone())
            }
        };
        guard.last_used = Utc::now();
        drop(guard);
        let _ = req.reply.send(result);
    }

    fn handle_delete(state: &RwLock<ShardState>, req: DeleteRequest) {
        let result = state.write().remove(&req.id, &req.tenant_id);
        let _ = req.reply.send(result);
    }

    /// Insert an atom, failing on an id collision.
    pub async fn add_atom(&self, atom: Atom) -> CoreResult<()> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.add_tx
            .send_async(AddRequest { atom, reply: tx })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Fetch one atom, verifying tenant ownership.
    pub async fn get_atom(&self, id: &str, tenant_id: &str) -> CoreResult<Atom> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send_async(QueryRequest::Get {
                id: id.to_string(),
                tenant_id: tenant_id.to_string(),
                reply: tx,
            })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Return the tenant's atoms on this shard, optionally filtered.
    pub async fn query_atoms(
        &self,
        tenant_id: &str,
        predicate: Option<AtomPredicate>,
    ) -> CoreResult<Vec<Atom>> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send_async(QueryRequest::Query {
                tenant_id: tenant_id.to_string(),
                predicate,
                reply: tx,
            })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Apply a mutator to an atom under the shard's write lock and return
    /// the updated atom.
    pub async fn update_atom(
        &self,
        id: &str,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> CoreResult<Atom> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.update_tx
            .send_async(UpdateRequest {
                id: id.to_string(),
                tenant_id: tenant_id.to_string(),
                mutator,
                reply: tx,
            })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Remove an atom from the primary map and every index.
    pub async fn delete_atom(&self, id: &str, tenant_id: &str) -> CoreResult<()> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.delete_tx
            .send_async(DeleteRequest {
                id: id.to_string(),
                tenant_id: tenant_id.to_string(),
                reply: tx,
            })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Per-tenant stats for this shard.
    pub async fn stats(&self, tenant_id: &str) -> CoreResult<ShardTenantStats> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send_async(QueryRequest::Stats {
                tenant_id: tenant_id.to_string(),
                reply: tx,
            })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Shard position within the manager.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current load counter, read directly for monitoring.
    pub fn load(&self) -> u64 {
        self.state.read().load
    }

    /// Instant of the last operation that touched this shard.
    pub fn last_used(&self) -> DateTime<Utc> {
        self.state.read().last_used
    }

    /// Total atoms currently stored, read directly for monitoring.
    pub fn atom_count(&self) -> usize {
        self.state.read().atoms.len()
    }

    /// Stop the worker pool. Idempotent; in-flight requests may observe
    /// `Closed`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
        }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::Closed);
        }
        Ok(())
    }
}

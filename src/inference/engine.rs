//! Per-tenant inference engine
//!
//! Dispatches rule applications to a worker pool and drives them to a
//! fixpoint: iterate until a full pass adds no atom, the snapshot is
//! empty, no rule fires, or the iteration cap is reached. Re-derived
//! atoms collide on their content address at reinsert time, which is the
//! progress measure that makes the loop terminate.

use crate::atom::Atom;
use crate::atomspace::TenantAtomSpace;
use crate::cancel::CancelToken;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::inference::rules::{default_rules, InferenceRule, RuleContext};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

struct RuleTask {
    rule: Arc<dyn InferenceRule>,
    ctx: Arc<RuleContext>,
    atoms: Arc<Vec<Atom>>,
    reply: flume::Sender<CoreResult<Vec<Atom>>>,
}

/// Accumulated engine counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_runs: u64,
    pub total_iterations: u64,
    pub total_atoms_inferred: u64,
    pub last_run_ms: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Fixpoint inference engine scoped to one tenant.
///
/// The rule list is read-only during a run; registering a rule takes the
/// write lock and therefore waits for the current iteration's snapshot.
pub struct InferenceEngine {
    tenant_id: String,
    space: TenantAtomSpace,
    rules: Arc<RwLock<Vec<Arc<dyn InferenceRule>>>>,
    task_tx: flume::Sender<RuleTask>,
    shutdown: CancelToken,
    stats: Arc<RwLock<EngineStats>>,
}

impl InferenceEngine {
    /// Create an engine with an empty rule list.
    pub fn new(space: TenantAtomSpace, config: &CoreConfig) -> Self {
        let (task_tx, task_rx) = flume::bounded::<RuleTask>(config.queue_capacity);
        let shutdown = CancelToken::new();

        for _ in 0..config.inference_workers.max(1) {
            let task_rx = task_rx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        task = task_rx.recv_async() => match task {
                            Err(_) => break,
                            Ok(task) => {
                                let result = task.rule.apply(&task.ctx, &task.atoms);
                                let _ = task.reply.send_async(result).await;
                            }
                        },
                    }
                }
            });
        }

        Self {
            tenant_id: space.tenant_id().to_string(),
            space,
            rules: Arc::new(RwLock::new(Vec::new())),
            task_tx,
            shutdown,
            stats: Arc::new(RwLock::new(EngineStats::default())),
        }
    }

    /// Create an engine pre-loaded with the default rule set.
    pub fn with_default_rules(space: TenantAtomSpace, config: &CoreConfig) -> Self {
        let engine = Self::new(space, config);
        for rule in default_rules() {
            engine.register_rule(rule);
        }
        engine
    }

    /// Append a rule. Rules fire in registration order; priority is
    /// informational.
    pub fn register_rule(&self, rule: Arc<dyn InferenceRule>) {
        debug!(tenant = %self.tenant_id, rule = rule.name(), "rule registered");
        self.rules.write().push(rule);
    }

    /// Names of the registered rules, in firing order.
    pub fn rule_names(&self) -> Vec<String> {
        self.rules.read().iter().map(|r| r.name().to_string()).collect()
    }

    /// Run rule application to a fixpoint, bounded by `max_iterations`.
    ///
    /// Returns every atom newly added to the atomspace. Cancellation is
    /// honored at the top of each iteration and reported as `Cancelled`,
    /// or `DeadlineExceeded` when the token's own deadline fired; atoms
    /// inserted by completed iterations stay in the atomspace.
    #[instrument(skip(self, token), fields(tenant = %self.tenant_id))]
    pub async fn run(&self, token: &CancelToken, max_iterations: usize) -> CoreResult<Vec<Atom>> {
        let started = Instant::now();
        let mut accumulated: Vec<Atom> = Vec::new();
        let mut iterations_run = 0u64;

        for iteration in 0..max_iterations {
            if token.is_cancelled() {
                self.finish_run(started, iterations_run, accumulated.len());
                return Err(token.cancel_error());
            }

            let atoms = self.space.query_all().await?;
            if atoms.is_empty() {
                break;
            }
            let snapshot = Arc::new(atoms);
            let rules: Vec<Arc<dyn InferenceRule>> = self.rules.read().clone();
            let ctx = Arc::new(RuleContext {
                tenant_id: self.tenant_id.clone(),
                iteration,
            });

            let (reply_tx, reply_rx) = flume::bounded(rules.len().max(1));
            let mut submitted = 0usize;
            for rule in rules {
                if rule.can_apply(&snapshot) {
                    self.task_tx
                        .send_async(RuleTask {
                            rule,
                            ctx: ctx.clone(),
                            atoms: snapshot.clone(),
                            reply: reply_tx.clone(),
                        })
                        .await
                        .map_err(|_| CoreError::Closed)?;
                    submitted += 1;
                }
            }
            drop(reply_tx);
            if submitted == 0 {
                break;
            }
            iterations_run += 1;

            let mut added_this_iter = 0usize;
            for _ in 0..submitted {
                let outcome = reply_rx.recv_async().await.map_err(|_| CoreError::Closed)?;
                let new_atoms = match outcome {
                    Ok(atoms) => atoms,
                    Err(err) => {
                        warn!(tenant = %self.tenant_id, %err, "rule application failed; skipping");
                        continue;
                    }
                };
                for atom in new_atoms {
                    match self.space.add_atom(atom.clone()).await {
                        Ok(()) => {
                            accumulated.push(atom);
                            added_this_iter += 1;
                        }
                        // Re-derivation of a known atom; not progress.
                        Err(CoreError::AlreadyExists(_)) => {}
                        Err(err) => {
                            debug!(tenant = %self.tenant_id, %err, "reinsert failed; skipping");
                        }
                    }
                }
            }

            debug!(
                tenant = %self.tenant_id,
                iteration,
                submitted,
                added = added_this_iter,
                "inference iteration complete"
            );
            if added_this_iter == 0 {
                break;
            }
        }

        self.finish_run(started, iterations_run, accumulated.len());
        info!(
            tenant = %self.tenant_id,
            new_atoms = accumulated.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "inference run complete"
        );
        Ok(accumulated)
    }

    fn finish_run(&self, started: Instant, iterations: u64, inferred: usize) {
        let mut stats = self.stats.write();
        stats.total_runs += 1;
        stats.total_iterations += iterations;
        stats.total_atoms_inferred += inferred as u64;
        stats.last_run_ms = started.elapsed().as_millis() as u64;
        stats.last_run_at = Some(Utc::now());
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Stop the worker pool. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

//! Priority-scheduled agent executor
//!
//! Registration flows through a command channel into a single management
//! task, which also owns the tick loop. Each tick copies the
//! priority-sorted agent list and submits the agents one at a time to a
//! worker pool, awaiting each run before dispatching the next, so ordering
//! within a tick is deterministic. Every run carries a hard deadline.

use super::{Agent, AgentState, AgentStats};
use crate::cancel::CancelToken;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 100;
const RUN_QUEUE_CAPACITY: usize = 100;

/// Snapshot of one registered agent, for stats surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub priority: i32,
    pub state: AgentState,
    pub stats: AgentStats,
}

enum Command {
    Register(Arc<dyn Agent>, oneshot::Sender<CoreResult<()>>),
    Unregister(String, oneshot::Sender<CoreResult<()>>),
}

struct RunRequest {
    agent: Arc<dyn Agent>,
    done: oneshot::Sender<()>,
}

#[derive(Clone)]
struct Registered {
    agent: Arc<dyn Agent>,
    seq: u64,
}

/// Periodic, priority-ordered executor for autonomous agents.
pub struct AgentExecutor {
    cmd_tx: mpsc::Sender<Command>,
    registry: Arc<RwLock<Vec<Registered>>>,
    shutdown: CancelToken,
    closed: AtomicBool,
}

impl AgentExecutor {
    /// Start the management task and the run worker pool.
    pub fn new(config: &CoreConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (run_tx, run_rx) = flume::bounded::<RunRequest>(RUN_QUEUE_CAPACITY);
        let registry: Arc<RwLock<Vec<Registered>>> = Arc::new(RwLock::new(Vec::new()));
        let shutdown = CancelToken::new();

        for _ in 0..config.agent_workers.max(1) {
            let run_rx = run_rx.clone();
            let shutdown = shutdown.clone();
            let run_timeout = config.agent_run_timeout();
            tokio::spawn(async move {
                Self::run_worker(run_rx, shutdown, run_timeout).await;
            });
        }

        {
            let registry = registry.clone();
            let shutdown = shutdown.clone();
            let tick = config.agent_tick();
            tokio::spawn(async move {
                Self::management_loop(cmd_rx, run_tx, registry, shutdown, tick).await;
            });
        }

        info!(
            workers = config.agent_workers,
            tick_ms = config.agent_tick_ms,
            "agent executor started"
        );
        Self {
            cmd_tx,
            registry,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    async fn management_loop(
        mut cmd_rx: mpsc::Receiver<Command>,
        run_tx: flume::Sender<RunRequest>,
        registry: Arc<RwLock<Vec<Registered>>>,
        shutdown: CancelToken,
        tick: Duration,
    ) {
        let mut next_seq = 0u64;
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = cmd_rx.recv() => match command {
                    None => break,
                    Some(Command::Register(agent, reply)) => {
                        let result = {
                            let mut agents = registry.write();
                            if agents.iter().any(|r| r.agent.id() == agent.id()) {
                                Err(CoreError::AlreadyExists(format!("agent {}", agent.id())))
                            } else {
                                debug!(agent = agent.id(), "agent registered");
                                agents.push(Registered { agent, seq: next_seq });
                                next_seq += 1;
                                Ok(())
                            }
                        };
                        let _ = reply.send(result);
                    }
                    Some(Command::Unregister(id, reply)) => {
                        let result = {
                            let mut agents = registry.write();
                            let before = agents.len();
                            agents.retain(|r| r.agent.id() != id);
                            if agents.len() == before {
                                Err(CoreError::NotFound(format!("agent {}", id)))
                            } else {
                                debug!(agent = %id, "agent unregistered");
                                Ok(())
                            }
                        };
                        let _ = reply.send(result);
                    }
                },
                _ = ticker.tick() => {
                    Self::dispatch_tick(&run_tx, &registry, &shutdown).await;
                }
            }
        }
    }

    /// Dispatch one tick: agents sorted by priority (higher first, ties by
    /// registration order), each awaited before the next is submitted.
    async fn dispatch_tick(
        run_tx: &flume::Sender<RunRequest>,
        registry: &RwLock<Vec<Registered>>,
        shutdown: &CancelToken,
    ) {
        let mut snapshot: Vec<Registered> = registry.read().clone();
        snapshot.sort_by(|a, b| {
            b.agent
                .priority()
                .cmp(&a.agent.priority())
                .then(a.seq.cmp(&b.seq))
        });

        for registered in snapshot {
            if shutdown.is_cancelled() {
                return;
            }
            if registered.agent.state() == AgentState::Stopped {
                continue;
            }
            let (done_tx, done_rx) = oneshot::channel();
            if run_tx
                .send_async(RunRequest {
                    agent: registered.agent,
                    done: done_tx,
                })
                .await
                .is_err()
            {
                return;
            }
            let _ = done_rx.await;
        }
    }

    async fn run_worker(
        run_rx: flume::Receiver<RunRequest>,
        shutdown: CancelToken,
        run_timeout: Duration,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = run_rx.recv_async() => match request {
                    Err(_) => break,
                    Ok(RunRequest { agent, done }) => {
                        agent.set_state(AgentState::Running);
                        let started = Instant::now();
                        // Cooperative deadline for the run itself, tied to
                        // executor shutdown; the outer timeout is the hard
                        // backstop for runs that never poll the token.
                        let run_token = shutdown.child_with_timeout(run_timeout);
                        match tokio::time::timeout(run_timeout, agent.run(&run_token)).await {
                            Ok(Ok(())) => {
                                agent.record_run(started.elapsed());
                                agent.set_state(AgentState::Idle);
                            }
                            Ok(Err(err)) => {
                                warn!(agent = agent.id(), %err, "agent run failed");
                                agent.set_state(AgentState::Error);
                            }
                            Err(_) => {
                                warn!(
                                    agent = agent.id(),
                                    timeout_ms = run_timeout.as_millis() as u64,
                                    "agent run exceeded deadline"
                                );
                                agent.set_state(AgentState::Error);
                            }
                        }
                        // Release the run's deadline timer promptly.
                        run_token.cancel();
                        let _ = done.send(());
                    }
                },
            }
        }
    }

    /// Register an agent. Duplicate ids are rejected.
    pub async fn register(&self, agent: Arc<dyn Agent>) -> CoreResult<()> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register(agent, tx))
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Remove an agent from the schedule.
    pub async fn unregister(&self, id: &str) -> CoreResult<()> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Unregister(id.to_string(), tx))
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    pub fn get_agent(&self, id: &str) -> CoreResult<Arc<dyn Agent>> {
        self.registry
            .read()
            .iter()
            .find(|r| r.agent.id() == id)
            .map(|r| r.agent.clone())
            .ok_or_else(|| CoreError::NotFound(format!("agent {}", id)))
    }

    /// Agents of one tenant, in priority order.
    pub fn agents_by_tenant(&self, tenant_id: &str) -> Vec<Arc<dyn Agent>> {
        let mut matching: Vec<Registered> = self
            .registry
            .read()
            .iter()
            .filter(|r| r.agent.tenant_id() == tenant_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.agent
                .priority()
                .cmp(&a.agent.priority())
                .then(a.seq.cmp(&b.seq))
        });
        matching.into_iter().map(|r| r.agent).collect()
    }

    /// Stats snapshots for every agent of one tenant.
    pub fn agent_infos(&self, tenant_id: &str) -> Vec<AgentInfo> {
        self.agents_by_tenant(tenant_id)
            .into_iter()
            .map(|agent| AgentInfo {
                id: agent.id().to_string(),
                name: agent.name().to_string(),
                tenant_id: agent.tenant_id().to_string(),
                priority: agent.priority(),
                state: agent.state(),
                stats: agent.stats(),
            })
            .collect()
    }

    /// Stop the scheduler and the worker pool. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            info!("agent executor closed");
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
    use crate::agents::AgentCore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    /// Test agent that counts its runs and optionally fails.
    struct ProbeAgent {
        id: String,
        tenant_id: String,
        priority: i32,
        core: AgentCore,
        runs: Arc<AtomicU64>,
        fail: bool,
    }

    impl ProbeAgent {
        fn new(id: &str, priority: i32, fail: bool) -> (Arc<Self>, Arc<AtomicU64>) {
            let runs = Arc::new(AtomicU64::new(0));
            (
                Arc::new(Self {
                    id: id.to_string(),
                    tenant_id: "demo".into(),
                    priority,
                    core: AgentCore::new(),
                    runs: runs.clone(),
                    fail,
                }),
                runs,
            )
        }
    }

    #[async_trait]
    impl Agent for ProbeAgent {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            "ProbeAgent"
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
        async fn run(&self, _token: &CancelToken) -> CoreResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CoreError::InvalidInput("probe failure".into()))
            } else {
                Ok(())
            }
        }
        fn stats(&self) -> AgentStats {
            self.core.stats()
        }
        fn record_run(&self, elapsed: Duration) {
            self.core.record_run(elapsed);
        }
    }

    fn executor(tick_ms: u64) -> AgentExecutor {
        let config = CoreConfig {
            agent_workers: 2,
            agent_tick_ms: tick_ms,
            ..Default::default()
        };
        AgentExecutor::new(&config)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let executor = executor(10_000);
        let (agent, _) = ProbeAgent::new("probe-1", 0, false);
        executor.register(agent.clone()).await.unwrap();

        assert!(executor.get_agent("probe-1").is_ok());
        assert!(matches!(
            executor.get_agent("missing"),
            Err(CoreError::NotFound(_))
        ));
        assert_eq!(executor.agents_by_tenant("demo").len(), 1);

        // Duplicate registration is rejected.
        assert!(matches!(
            executor.register(agent).await,
            Err(CoreError::AlreadyExists(_))
        ));
        executor.close();
    }

    #[tokio::test]
    async fn test_unregister() {
        let executor = executor(10_000);
        let (agent, _) = ProbeAgent::new("probe-1", 0, false);
        executor.register(agent).await.unwrap();
        executor.unregister("probe-1").await.unwrap();
        assert!(matches!(
            executor.unregister("probe-1").await,
            Err(CoreError::NotFound(_))
        ));
        executor.close();
    }

    #[tokio::test]
    async fn test_agents_run_on_ticks() {
        let executor = executor(20);
        let (agent, runs) = ProbeAgent::new("probe-1", 0, false);
        executor.register(agent.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert!(agent.stats().run_count >= 2);
        assert_eq!(agent.state(), AgentState::Idle);
        executor.close();
    }

    #[tokio::test]
    async fn test_failing_agent_enters_error_state_and_is_retried() {
        let executor = executor(20);
        let (agent, runs) = ProbeAgent::new("probe-fail", 0, true);
        executor.register(agent.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(agent.state(), AgentState::Error);
        // The scheduler keeps dispatching despite the error state.
        assert!(runs.load(Ordering::SeqCst) >= 2);
        // Failed runs are not recorded as successful runs.
        assert_eq!(agent.stats().run_count, 0);
        executor.close();
    }

    #[tokio::test]
    async fn test_priority_order_within_tenant() {
        let executor = executor(10_000);
        let (low, _) = ProbeAgent::new("low", 1, false);
        let (high, _) = ProbeAgent::new("high", 9, false);
        executor.register(low).await.unwrap();
        executor.register(high).await.unwrap();

        let ordered = executor.agents_by_tenant("demo");
        assert_eq!(ordered[0].id(), "high");
        assert_eq!(ordered[1].id(), "low");
        executor.close();
    }

    #[tokio::test]
    async fn test_closed_executor_rejects_registration() {
        let executor = executor(10_000);
        executor.close();
        executor.close();
        let (agent, _) = ProbeAgent::new("probe-1", 0, false);
        assert!(matches!(
            executor.register(agent).await,
            Err(CoreError::Closed)
        ));
    }
}

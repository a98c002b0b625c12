//! Pipeline registry and execution pool

use super::{Pipeline, PipelineData, PipelineInfo, PipelineStage, StageContext};
use crate::cancel::CancelToken;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

struct ExecuteRequest {
    pipeline: Arc<Pipeline>,
    ctx: StageContext,
    input: PipelineData,
    reply: oneshot::Sender<CoreResult<PipelineData>>,
}

/// Registry of pipelines plus a worker pool that executes them.
pub struct PipelineOrchestrator {
    pipelines: DashMap<String, Arc<Pipeline>>,
    exec_tx: flume::Sender<ExecuteRequest>,
    shutdown: CancelToken,
    closed: AtomicBool,
}

impl PipelineOrchestrator {
    pub fn new(config: &CoreConfig) -> Self {
        let (exec_tx, exec_rx) = flume::bounded::<ExecuteRequest>(config.queue_capacity);
        let shutdown = CancelToken::new();

        for _ in 0..config.pipeline_workers.max(1) {
            let exec_rx = exec_rx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        request = exec_rx.recv_async() => match request {
                            Err(_) => break,
                            Ok(request) => {
                                let result = request
                                    .pipeline
                                    .execute(&request.ctx, request.input)
                                    .await;
                                let _ = request.reply.send(result);
                            }
                        },
                    }
                }
            });
        }

        info!(workers = config.pipeline_workers, "pipeline orchestrator started");
        Self {
            pipelines: DashMap::new(),
            exec_tx,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Register a new pipeline. Duplicate ids are rejected.
    pub fn create_pipeline(
        &self,
        id: &str,
        name: &str,
        tenant_id: &str,
    ) -> CoreResult<Arc<Pipeline>> {
        self.ensure_open()?;
        match self.pipelines.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CoreError::AlreadyExists(format!("pipeline {}", id)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let pipeline = Arc::new(Pipeline::new(id, name, tenant_id));
                slot.insert(pipeline.clone());
                debug!(pipeline = %id, tenant = %tenant_id, "pipeline created");
                Ok(pipeline)
            }
        }
    }

    pub fn get_pipeline(&self, id: &str) -> CoreResult<Arc<Pipeline>> {
        self.pipelines
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::NotFound(format!("pipeline {}", id)))
    }

    pub fn delete_pipeline(&self, id: &str) -> CoreResult<()> {
        self.pipelines
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("pipeline {}", id)))
    }

    /// Append a stage to an existing pipeline.
    pub fn add_stage(&self, id: &str, stage: Arc<dyn PipelineStage>) -> CoreResult<()> {
        self.get_pipeline(id)?.add_stage(stage);
        Ok(())
    }

    /// Execute a pipeline through the worker pool and await its result.
    pub async fn execute(
        &self,
        id: &str,
        ctx: StageContext,
        input: PipelineData,
    ) -> CoreResult<PipelineData> {
        self.ensure_open()?;
        let pipeline = self.get_pipeline(id)?;
        let (tx, rx) = oneshot::channel();
        self.exec_tx
            .send_async(ExecuteRequest {
                pipeline,
                ctx,
                input,
                reply: tx,
            })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Snapshots of every pipeline belonging to one tenant.
    pub fn pipeline_infos(&self, tenant_id: &str) -> Vec<PipelineInfo> {
        self.pipelines
            .iter()
            .filter(|entry| entry.value().tenant_id == tenant_id)
            .map(|entry| entry.value().info())
            .collect()
    }

    /// Stop the worker pool. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            info!("pipeline orchestrator closed");
        }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::Closed);
        }
        Ok(())
    }
}

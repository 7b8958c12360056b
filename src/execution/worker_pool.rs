//! Fixed worker pool fed by a bounded queue
//!
//! Node starts and executable invocations are submitted as [`Job`]s. A
//! submission returns once the job is queued; a full queue applies
//! backpressure to the submitter and a closed pool is reported as an error.

use crate::core::{ExecutionContext, ExecutionMode};
use crate::execution::error::EngineError;
use crate::step::ResponseData;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Unit of work run by the pool
#[derive(Debug, Clone)]
pub enum Job {
    /// Start a persisted node execution
    StartNode { context: ExecutionContext },

    /// Invoke the step executable after facilitation decided `mode`
    InvokeExecutable {
        context: ExecutionContext,
        mode: ExecutionMode,
    },

    /// Hand task results back to the step executable
    ResumeExecutable {
        context: ExecutionContext,
        responses: HashMap<String, ResponseData>,
    },
}

impl Job {
    pub fn context(&self) -> &ExecutionContext {
        match self {
            Job::StartNode { context }
            | Job::InvokeExecutable { context, .. }
            | Job::ResumeExecutable { context, .. } => context,
        }
    }
}

/// Runs jobs taken off the queue
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle_job(&self, job: Job);
}

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing one queue of `capacity` jobs
    ///
    /// Workers hold the handler weakly and stop once it is gone or the pool
    /// is dropped.
    pub fn new(workers: usize, capacity: usize, handler: Weak<dyn JobHandler>) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let handler = handler.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };
                        let Some(handler) = handler.upgrade() else {
                            warn!("Worker {} dropping job, engine is gone", worker_id);
                            break;
                        };
                        debug!("Worker {} running job for {}", worker_id, job.context().describe());
                        handler.handle_job(job).await;
                    }
                    debug!("Worker {} stopped", worker_id);
                })
            })
            .collect();

        Self { sender, workers }
    }

    /// Queue a job, waiting for room if the queue is full
    pub async fn submit(&self, job: Job) -> Result<(), EngineError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| EngineError::WorkerPoolClosed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

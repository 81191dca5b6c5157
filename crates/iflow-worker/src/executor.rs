//! Job executor.

use std::sync::Arc;

use iflow_queue::{JobQueue, JobStateStore};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::consumer::JobQueueConsumer;
use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::PipelineRunner;

/// Runs a set of independent consumers until shutdown or a fatal error.
pub struct JobExecutor {
    consumers: Vec<Arc<JobQueueConsumer>>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(consumers: Vec<JobQueueConsumer>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            consumers: consumers.into_iter().map(Arc::new).collect(),
            shutdown,
        }
    }

    /// One consumer per configured slot, all sharing the queue, store and runner.
    pub fn from_config(
        config: &WorkerConfig,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn JobStateStore>,
        runner: Arc<PipelineRunner>,
    ) -> Self {
        let worker_id = Uuid::new_v4();
        let consumers = (0..config.concurrency)
            .map(|slot| {
                JobQueueConsumer::new(
                    format!("worker-{}-{}", worker_id, slot),
                    Arc::clone(&queue),
                    Arc::clone(&store),
                    Arc::clone(&runner),
                    config.multiplier,
                    config.dequeue_timeout,
                )
                .with_max_multiplier(config.max_multiplier)
            })
            .collect();

        Self::new(consumers)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Run every consumer to completion.
    ///
    /// The first fatal error shuts the remaining consumers down and is
    /// returned once they have all stopped.
    pub async fn run(&self) -> WorkerResult<()> {
        info!("Starting job executor with {} consumers", self.consumers.len());

        let mut tasks = JoinSet::new();
        for consumer in &self.consumers {
            let consumer = Arc::clone(consumer);
            let shutdown = self.shutdown.subscribe();
            tasks.spawn(async move { consumer.run(shutdown).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(WorkerError::job_failed(format!("consumer task failed: {e}")))
            });

            if let Err(e) = result {
                error!("Consumer exited with error: {}", e);
                if first_error.is_none() {
                    self.shutdown();
                    first_error = Some(e);
                }
            }
        }

        info!("Job executor stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Signal shutdown. Consumers finish their current job first.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

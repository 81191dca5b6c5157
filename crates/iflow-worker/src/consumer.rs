//! Queue consumer.
//!
//! A consumer loops on a bounded dequeue, runs each job through the pipeline
//! and records the outcome in the job-state store. Job failures are recorded
//! and the loop moves on. Only a lost queue or store connection stops the
//! consumer; a store write rejected for one job fails that job.

use async_trait::async_trait;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use iflow_models::{InterpolationJob, JobId, JobStatus, DEFAULT_MAX_MULTIPLIER};
use iflow_queue::{JobQueue, JobStateStore};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{PipelineOutcome, PipelineRequest, PipelineRunner, ProgressReporter};
use crate::retry::{retry_store, RetryConfig};

/// Summary of one processed job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: JobId,
    /// Terminal status this consumer reached for the job
    pub status: JobStatus,
    pub outcome: Option<PipelineOutcome>,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Writes pipeline progress to the job-state store.
struct StoreProgressReporter {
    store: Arc<dyn JobStateStore>,
    job_id: JobId,
    retry: RetryConfig,
    logger: JobLogger,
}

#[async_trait]
impl ProgressReporter for StoreProgressReporter {
    async fn report(&self, progress: u8) -> WorkerResult<()> {
        let store = &self.store;
        let job_id = &self.job_id;
        retry_store(&self.retry, || store.set_progress(job_id, progress)).await?;
        self.logger.log_progress(progress);
        Ok(())
    }
}

/// One independent consumer of the job queue.
pub struct JobQueueConsumer {
    name: String,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobStateStore>,
    runner: Arc<PipelineRunner>,
    default_multiplier: u32,
    max_multiplier: u32,
    dequeue_timeout: Duration,
    retry: RetryConfig,
}

impl JobQueueConsumer {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn JobStateStore>,
        runner: Arc<PipelineRunner>,
        default_multiplier: u32,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            store,
            runner,
            default_multiplier,
            max_multiplier: DEFAULT_MAX_MULTIPLIER.max(default_multiplier),
            dequeue_timeout,
            retry: RetryConfig::new("job state store"),
        }
    }

    /// Reject jobs asking for more than `max_multiplier`.
    pub fn with_max_multiplier(mut self, max_multiplier: u32) -> Self {
        self.max_multiplier = max_multiplier;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consume jobs until `shutdown` flips to `true`.
    ///
    /// The flag is checked between dequeues, so a job in flight always runs
    /// to its terminal status first.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        info!(
            "Consumer '{}' started (dequeue timeout {:?})",
            self.name, self.dequeue_timeout
        );

        while !*shutdown.borrow() {
            match self.poll_once().await {
                Ok(Some(report)) => debug!(
                    "Consumer '{}' finished job {} as {} in {:?}",
                    self.name, report.job_id, report.status, report.duration
                ),
                Ok(None) => {}
                Err(e) if e.is_fatal_to_worker() => {
                    error!("Consumer '{}' stopping: {}", self.name, e);
                    return Err(e);
                }
                Err(e) => warn!("Consumer '{}' error: {}", self.name, e),
            }
        }

        info!("Consumer '{}' stopped", self.name);
        Ok(())
    }

    /// Dequeue and process at most one job.
    ///
    /// Returns `None` when the dequeue timed out or the payload was
    /// dead-lettered.
    pub async fn poll_once(&self) -> WorkerResult<Option<JobReport>> {
        let queue = &self.queue;
        let timeout = self.dequeue_timeout;
        let job = retry_store(&self.retry, || queue.dequeue(timeout)).await?;

        match job {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Run one job to a terminal status.
    pub async fn process(&self, job: InterpolationJob) -> WorkerResult<JobReport> {
        let started = Instant::now();
        let logger = JobLogger::new(&job.job_id, "interpolation");
        let multiplier = job.effective_multiplier(self.default_multiplier);

        logger.log_start(&format!(
            "{} -> {} x{} on '{}'",
            job.input_path, job.output_path, multiplier, self.name
        ));
        metrics::record_job_started(&self.name);

        let result = match self.mark_processing(&job.job_id).await {
            Ok(()) => match job.validate(self.default_multiplier, self.max_multiplier) {
                Ok(()) => self.run_pipeline(&job, multiplier, logger.clone()).await,
                Err(e) => Err(WorkerError::from(e)),
            },
            Err(e) => Err(e),
        };

        let store = &self.store;
        let job_id = &job.job_id;

        let result = match result {
            Ok(outcome) => {
                let output_path = job.output_path.as_str();
                retry_store(&self.retry, || store.mark_completed(job_id, output_path))
                    .await
                    .map(|()| outcome)
                    .map_err(WorkerError::from)
            }
            Err(e) => Err(e),
        };

        let duration = started.elapsed();

        match result {
            Ok(outcome) => {
                if outcome.fallback_frames > 0 {
                    logger.log_warning(&format!(
                        "{} of {} synthesized frames fell back to linear blend",
                        outcome.fallback_frames, outcome.interpolated_frames
                    ));
                }
                logger.log_completion(&format!(
                    "{} frames ({} synthesized, {} by fallback) at {} fps in {:.2}s",
                    outcome.frames_written,
                    outcome.interpolated_frames,
                    outcome.fallback_frames,
                    outcome.output_frame_rate,
                    duration.as_secs_f64()
                ));
                metrics::record_job_completed(
                    self.runner.strategy().name(),
                    duration.as_secs_f64(),
                    outcome.frames_written,
                    outcome.interpolated_frames,
                    outcome.fallback_frames,
                );

                Ok(JobReport {
                    job_id: job.job_id.clone(),
                    status: JobStatus::Completed,
                    outcome: Some(outcome),
                    error: None,
                    duration,
                })
            }
            Err(e) if e.is_fatal_to_worker() => {
                logger.log_error(&e.to_string());
                metrics::record_job_failed(e.kind(), duration.as_secs_f64());
                Err(e)
            }
            Err(e) => {
                let message = e.to_string();
                logger.log_error(&message);
                metrics::record_job_failed(e.kind(), duration.as_secs_f64());

                self.record_failure(job_id, &message, &logger).await?;

                Ok(JobReport {
                    job_id: job.job_id.clone(),
                    status: JobStatus::Failed,
                    outcome: None,
                    error: Some(message),
                    duration,
                })
            }
        }
    }

    /// Mark the job failed. A rejected write (for instance a job another
    /// consumer already finished) is logged and skipped.
    async fn record_failure(
        &self,
        job_id: &JobId,
        message: &str,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        let store = &self.store;
        match retry_store(&self.retry, || store.mark_failed(job_id, message)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_connectivity() => Err(e.into()),
            Err(e) => {
                logger.log_warning(&format!("could not record failure: {}", e));
                Ok(())
            }
        }
    }

    async fn mark_processing(&self, job_id: &JobId) -> WorkerResult<()> {
        let store = &self.store;
        retry_store(&self.retry, || store.set_status(job_id, JobStatus::Processing)).await?;
        retry_store(&self.retry, || store.set_progress(job_id, 0)).await?;
        Ok(())
    }

    /// Run the pipeline on its own task so a panic fails only this job.
    async fn run_pipeline(
        &self,
        job: &InterpolationJob,
        multiplier: u32,
        logger: JobLogger,
    ) -> WorkerResult<PipelineOutcome> {
        let span = logger.create_span();
        let runner = Arc::clone(&self.runner);
        let request = PipelineRequest {
            input_path: PathBuf::from(&job.input_path),
            output_path: PathBuf::from(&job.output_path),
            multiplier,
        };
        let reporter = StoreProgressReporter {
            store: Arc::clone(&self.store),
            job_id: job.job_id.clone(),
            retry: self.retry.clone(),
            logger,
        };

        let handle = tokio::spawn(
            async move { runner.run(&request, &reporter).await }.instrument(span),
        );

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(WorkerError::job_failed(format!(
                "pipeline panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(WorkerError::job_failed(format!("pipeline cancelled: {e}"))),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

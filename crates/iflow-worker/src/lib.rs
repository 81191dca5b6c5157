//! Frame interpolation worker.
//!
//! This crate provides:
//! - The per-job pipeline (decode, interpolate, encode, commit)
//! - Queue consumers that record job state and progress
//! - An executor running several consumers with graceful shutdown
//! - Worker configuration, logging and metrics

pub mod config;
pub mod consumer;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;

pub use config::WorkerConfig;
pub use consumer::{JobQueueConsumer, JobReport};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pipeline::{
    PipelineOutcome, PipelineRequest, PipelineRunner, PipelineStage, ProgressReporter,
};
pub use retry::{retry_store, RetryConfig};

//! Worker error types.

use iflow_media::MediaError;
use thiserror::Error;

use crate::pipeline::PipelineStage;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{stage} failed: {source}")]
    Pipeline {
        stage: PipelineStage,
        #[source]
        source: MediaError,
    },

    #[error("Queue error: {0}")]
    Queue(#[from] iflow_queue::QueueError),

    #[error("Model error: {0}")]
    Model(#[from] iflow_models::ModelError),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// A media error raised while the pipeline was in `stage`.
    pub fn pipeline(stage: PipelineStage, source: MediaError) -> Self {
        Self::Pipeline { stage, source }
    }

    /// Check if the error means the worker itself can no longer run.
    ///
    /// Only a lost queue or state store qualifies. A store error tied to one
    /// job's record (illegal transition, unparseable hash, wrong key type)
    /// fails that job and the worker moves on.
    pub fn is_fatal_to_worker(&self) -> bool {
        matches!(self, WorkerError::Queue(e) if e.is_connectivity())
    }

    /// Short machine-readable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::JobFailed(_) => "job_failed",
            WorkerError::Model(_) => "invalid_job",
            WorkerError::ConfigError(_) => "config",
            WorkerError::Pipeline { source, .. } => match source {
                MediaError::UnreadableSource { .. } => "unreadable_source",
                MediaError::UnwritableSink { .. } => "unwritable_sink",
                MediaError::DecodeFailed { .. } => "decode_failed",
                MediaError::EncodeFailed { .. } => "encode_failed",
                _ => "media",
            },
            WorkerError::Queue(_) => "queue",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iflow_models::{JobStatus, ModelError};
    use iflow_queue::QueueError;

    #[test]
    fn test_only_lost_connections_are_fatal() {
        assert!(WorkerError::from(QueueError::connection_failed("down")).is_fatal_to_worker());
        assert!(WorkerError::from(QueueError::dequeue_failed("reset")).is_fatal_to_worker());

        let transition =
            QueueError::invalid_transition("dup", JobStatus::Completed, JobStatus::Processing);
        assert!(!WorkerError::from(transition).is_fatal_to_worker());
        assert!(!WorkerError::from(QueueError::serialization("bad hash")).is_fatal_to_worker());

        assert!(!WorkerError::from(ModelError::invalid_job("empty input")).is_fatal_to_worker());
        assert!(!WorkerError::pipeline(
            PipelineStage::Reading,
            MediaError::unreadable("/in.mp4", "gone")
        )
        .is_fatal_to_worker());
    }

    #[test]
    fn test_pipeline_error_names_the_stage() {
        let err = WorkerError::pipeline(
            PipelineStage::Writing,
            MediaError::encode_failed("broken pipe", None),
        );
        assert_eq!(err.to_string(), "writing failed: Encode failed: broken pipe");
        assert_eq!(err.kind(), "encode_failed");
    }
}

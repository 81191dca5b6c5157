//! Queue error types.

use iflow_models::JobStatus;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Dequeue failed: {0}")]
    DequeueFailed(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn dequeue_failed(msg: impl Into<String>) -> Self {
        Self::DequeueFailed(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn invalid_transition(job_id: impl Into<String>, from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidTransition {
            job_id: job_id.into(),
            from,
            to,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) => true,
            QueueError::Redis(e) => is_connection_error(e),
            _ => false,
        }
    }

    /// Whether the queue or store itself is unusable, as opposed to a
    /// problem with one job's record or payload.
    pub fn is_connectivity(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) | QueueError::DequeueFailed(_) => true,
            QueueError::Redis(e) => is_connection_error(e),
            _ => false,
        }
    }
}

fn is_connection_error(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(QueueError::connection_failed("reset by peer").is_transient());
        assert!(!QueueError::serialization("bad status").is_transient());
        assert!(
            !QueueError::invalid_transition("job-1", JobStatus::Failed, JobStatus::Processing)
                .is_transient()
        );
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(QueueError::connection_failed("refused").is_connectivity());
        assert!(QueueError::dequeue_failed("BLPOP aborted").is_connectivity());

        assert!(!QueueError::serialization("bad progress").is_connectivity());
        assert!(
            !QueueError::invalid_transition("dup", JobStatus::Completed, JobStatus::Processing)
                .is_connectivity()
        );

        let wrong_type = redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        ));
        assert!(!QueueError::Redis(wrong_type).is_connectivity());

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!QueueError::from(json).is_connectivity());
    }
}

//! Queue and state store configuration.

use std::time::Duration;

/// Default Redis URL.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
/// Default list the jobs are pushed to.
pub const DEFAULT_QUEUE_NAME: &str = "video_processing_queue";
/// Default list malformed payloads are moved to.
pub const DEFAULT_DLQ_NAME: &str = "video_processing_dlq";
/// Default prefix of the job-state hashes.
pub const DEFAULT_STATE_PREFIX: &str = "job";
/// Default lifetime of a job-state hash (7 days).
pub const DEFAULT_STATE_TTL_SECS: u64 = 7 * 24 * 3600;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// List name for jobs
    pub queue_name: String,
    /// Dead letter list name
    pub dlq_name: String,
    /// Job-state hashes live at `<state_prefix>:<job_id>`
    pub state_prefix: String,
    /// Refreshed on every state write
    pub state_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            dlq_name: DEFAULT_DLQ_NAME.to_string(),
            state_prefix: DEFAULT_STATE_PREFIX.to_string(),
            state_ttl: Duration::from_secs(DEFAULT_STATE_TTL_SECS),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            queue_name: std::env::var("QUEUE_NAME")
                .unwrap_or_else(|_| DEFAULT_QUEUE_NAME.to_string()),
            dlq_name: std::env::var("QUEUE_DLQ_NAME")
                .unwrap_or_else(|_| DEFAULT_DLQ_NAME.to_string()),
            state_prefix: std::env::var("JOB_STATE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_STATE_PREFIX.to_string()),
            state_ttl: Duration::from_secs(
                std::env::var("JOB_STATE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_STATE_TTL_SECS),
            ),
        }
    }

    /// Redis key of a job's state hash.
    pub fn state_key(&self, job_id: &str) -> String {
        format!("{}:{}", self.state_prefix, job_id)
    }
}

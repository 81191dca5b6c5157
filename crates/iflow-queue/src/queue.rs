//! FIFO job queue.
//!
//! Jobs travel as JSON payloads. Dequeue pops and removes in one step, so each
//! enqueued job is handed to at most one consumer. Payloads that fail to parse
//! are moved to a dead-letter list and never reach a consumer.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use iflow_models::{InterpolationJob, JobStatus};
use redis::AsyncCommands;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// A queue of interpolation jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job at the tail.
    async fn enqueue(&self, job: &InterpolationJob) -> QueueResult<()>;

    /// Pop the head, waiting up to `timeout` for one to arrive.
    ///
    /// `Ok(None)` means the wait elapsed, or the popped payload was
    /// malformed and dead-lettered.
    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<InterpolationJob>>;

    /// Number of waiting jobs.
    async fn len(&self) -> QueueResult<u64>;
}

/// Parse a payload, or explain why it was rejected.
fn decode_payload(payload: &str) -> Result<InterpolationJob, String> {
    serde_json::from_str::<InterpolationJob>(payload).map_err(|e| e.to_string())
}

/// Job queue on a Redis list (`RPUSH` / `BLPOP`).
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Check that Redis answers.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.llen(&self.config.dlq_name).await?;
        Ok(len)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Move a malformed payload to the dead letter list.
    async fn dead_letter(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        payload: &str,
        reason: &str,
    ) -> QueueResult<()> {
        let entry = serde_json::json!({
            "payload": payload,
            "error": reason,
            "failed_at": Utc::now().to_rfc3339(),
        });

        conn.rpush::<_, _, ()>(&self.config.dlq_name, entry.to_string())
            .await?;

        warn!(
            "Moved malformed payload to {}: {}",
            self.config.dlq_name, reason
        );
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &InterpolationJob) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        let state_key = self.config.state_key(job.job_id.as_str());

        // State first, so a fast consumer never sees a job without a record
        redis::cmd("HSET")
            .arg(&state_key)
            .arg("status")
            .arg(JobStatus::Pending.as_str())
            .arg("progress")
            .arg(0)
            .arg("updated_at")
            .arg(Utc::now().to_rfc3339())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(format!("writing job state: {e}")))?;
        conn.expire::<_, ()>(&state_key, self.config.state_ttl.as_secs() as i64)
            .await?;

        conn.rpush::<_, _, ()>(&self.config.queue_name, &payload)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!("Enqueued job {} on {}", job.job_id, self.config.queue_name);
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<InterpolationJob>> {
        let mut conn = self.connection().await?;

        // BLPOP treats 0 as "block forever"
        let timeout_secs = timeout.as_secs().max(1);

        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.config.queue_name)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::dequeue_failed(e.to_string()))?;

        let Some((_, payload)) = popped else {
            return Ok(None);
        };

        match decode_payload(&payload) {
            Ok(job) => {
                debug!("Dequeued job {} from {}", job.job_id, self.config.queue_name);
                Ok(Some(job))
            }
            Err(reason) => {
                self.dead_letter(&mut conn, &payload, &reason).await?;
                Ok(None)
            }
        }
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.llen(&self.config.queue_name).await?;
        Ok(len)
    }
}

/// In-process job queue with the same pop-and-remove semantics.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<String>>,
    dead_letters: Mutex<Vec<String>>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw payload, bypassing serialization.
    pub fn push_raw(&self, payload: impl Into<String>) {
        lock(&self.jobs).push_back(payload.into());
        self.notify.notify_one();
    }

    /// Payloads moved to the dead letter list.
    pub fn dead_letters(&self) -> Vec<String> {
        lock(&self.dead_letters).clone()
    }

    fn pop(&self) -> Option<String> {
        lock(&self.jobs).pop_front()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &InterpolationJob) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        self.push_raw(payload);
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<InterpolationJob>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();

            if let Some(payload) = self.pop() {
                return match decode_payload(&payload) {
                    Ok(job) => Ok(Some(job)),
                    Err(reason) => {
                        warn!("Moved malformed payload to dead letters: {}", reason);
                        lock(&self.dead_letters).push(payload);
                        Ok(None)
                    }
                };
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(lock(&self.jobs).len() as u64)
    }
}

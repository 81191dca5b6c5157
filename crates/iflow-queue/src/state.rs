//! Job-state store.
//!
//! One record per job, written by the worker that owns the job and read by
//! anyone polling for status. Redis keeps it as a hash:
//!
//! ```text
//! job:<id>  status       pending | processing | completed | failed
//!           progress     0..100
//!           output_path  set once completed
//!           error        set once failed
//!           updated_at   RFC 3339
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use iflow_models::{JobId, JobState, JobStatus};
use redis::AsyncCommands;
use tracing::debug;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Shared record of job progress and outcome.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    async fn set_status(&self, job_id: &JobId, status: JobStatus) -> QueueResult<()>;

    async fn set_progress(&self, job_id: &JobId, progress: u8) -> QueueResult<()>;

    async fn set_output(&self, job_id: &JobId, output_path: &str) -> QueueResult<()>;

    async fn set_error(&self, job_id: &JobId, error: &str) -> QueueResult<()>;

    /// Current record, or `None` for an unknown job.
    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobState>>;

    /// Record success. The output path is written before the status flips.
    async fn mark_completed(&self, job_id: &JobId, output_path: &str) -> QueueResult<()> {
        self.set_output(job_id, output_path).await?;
        self.set_progress(job_id, 100).await?;
        self.set_status(job_id, JobStatus::Completed).await
    }

    /// Record failure. The error is written before the status flips.
    async fn mark_failed(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        self.set_error(job_id, error).await?;
        self.set_status(job_id, JobStatus::Failed).await
    }
}

/// Job-state store on Redis hashes.
///
/// Transitions are not checked here: each record has a single writer, the
/// worker that dequeued the job.
pub struct RedisStateStore {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisStateStore {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// `HSET` the given fields plus `updated_at`, then refresh the TTL.
    async fn write_fields(&self, job_id: &JobId, fields: &[(&str, String)]) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let key = self.config.state_key(job_id.as_str());

        let mut cmd = redis::cmd("HSET");
        cmd.arg(&key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value);
        }
        cmd.arg("updated_at").arg(Utc::now().to_rfc3339());
        cmd.query_async::<()>(&mut conn).await?;

        conn.expire::<_, ()>(&key, self.config.state_ttl.as_secs() as i64)
            .await?;

        debug!(job_id = %job_id, "Wrote job state fields {:?}", field_names(fields));
        Ok(())
    }

    async fn delete_field(&self, job_id: &JobId, field: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let key = self.config.state_key(job_id.as_str());
        conn.hdel::<_, _, ()>(&key, field).await?;
        Ok(())
    }
}

fn field_names<'a>(fields: &'a [(&'a str, String)]) -> Vec<&'a str> {
    fields.iter().map(|(name, _)| *name).collect()
}

#[async_trait]
impl JobStateStore for RedisStateStore {
    async fn set_status(&self, job_id: &JobId, status: JobStatus) -> QueueResult<()> {
        self.write_fields(job_id, &[("status", status.as_str().to_string())])
            .await
    }

    async fn set_progress(&self, job_id: &JobId, progress: u8) -> QueueResult<()> {
        self.write_fields(job_id, &[("progress", progress.min(100).to_string())])
            .await
    }

    async fn set_output(&self, job_id: &JobId, output_path: &str) -> QueueResult<()> {
        self.write_fields(job_id, &[("output_path", output_path.to_string())])
            .await
    }

    async fn set_error(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        self.write_fields(job_id, &[("error", error.to_string())])
            .await
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobState>> {
        let mut conn = self.connection().await?;
        let key = self.config.state_key(job_id.as_str());

        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        parse_state(job_id, &fields).map(Some)
    }

    // Single HSET: observers never see `completed` without `output_path`
    async fn mark_completed(&self, job_id: &JobId, output_path: &str) -> QueueResult<()> {
        self.write_fields(
            job_id,
            &[
                ("output_path", output_path.to_string()),
                ("progress", "100".to_string()),
                ("status", JobStatus::Completed.as_str().to_string()),
            ],
        )
        .await
    }

    async fn mark_failed(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        self.write_fields(
            job_id,
            &[
                ("error", error.to_string()),
                ("status", JobStatus::Failed.as_str().to_string()),
            ],
        )
        .await?;
        self.delete_field(job_id, "output_path").await
    }
}

/// Rebuild a [`JobState`] from hash fields.
fn parse_state(job_id: &JobId, fields: &HashMap<String, String>) -> QueueResult<JobState> {
    let status = match fields.get("status") {
        Some(s) => s
            .parse::<JobStatus>()
            .map_err(|e| QueueError::serialization(format!("job {}: {}", job_id, e)))?,
        None => JobStatus::Pending,
    };

    let progress = match fields.get("progress") {
        Some(p) => p.parse::<u8>().map_err(|e| {
            QueueError::serialization(format!("job {}: bad progress '{}': {}", job_id, p, e))
        })?,
        None => 0,
    };

    let non_empty = |name: &str| fields.get(name).filter(|v| !v.is_empty()).cloned();

    let updated_at = fields
        .get("updated_at")
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(JobState {
        job_id: job_id.clone(),
        status,
        progress: progress.min(100),
        output_path: non_empty("output_path"),
        error: non_empty("error"),
        updated_at,
    })
}

/// In-process job-state store that enforces the status lifecycle.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<JobId, JobState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record.
    pub async fn all(&self) -> Vec<JobState> {
        self.states.read().await.values().cloned().collect()
    }

    /// Apply `update` to the record, creating it as pending if missing.
    async fn update<F>(&self, job_id: &JobId, next: Option<JobStatus>, update: F) -> QueueResult<()>
    where
        F: FnOnce(&mut JobState) + Send,
    {
        let mut states = self.states.write().await;
        let state = states
            .entry(job_id.clone())
            .or_insert_with(|| JobState::pending(job_id.clone()));

        if let Some(next) = next {
            if !state.status.can_transition_to(next) {
                return Err(QueueError::invalid_transition(
                    job_id.as_str(),
                    state.status,
                    next,
                ));
            }
        }

        update(state);
        Ok(())
    }
}

#[async_trait]
impl JobStateStore for MemoryStateStore {
    async fn set_status(&self, job_id: &JobId, status: JobStatus) -> QueueResult<()> {
        self.update(job_id, Some(status), |state| state.set_status(status))
            .await
    }

    async fn set_progress(&self, job_id: &JobId, progress: u8) -> QueueResult<()> {
        self.update(job_id, None, |state| state.set_progress(progress))
            .await
    }

    async fn set_output(&self, job_id: &JobId, output_path: &str) -> QueueResult<()> {
        let output_path = output_path.to_string();
        self.update(job_id, None, move |state| {
            state.output_path = Some(output_path);
            state.updated_at = Utc::now();
        })
        .await
    }

    async fn set_error(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        let error = error.to_string();
        self.update(job_id, None, move |state| {
            state.error = Some(error);
            state.updated_at = Utc::now();
        })
        .await
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobState>> {
        Ok(self.states.read().await.get(job_id).cloned())
    }

    async fn mark_completed(&self, job_id: &JobId, output_path: &str) -> QueueResult<()> {
        let output_path = output_path.to_string();
        self.update(job_id, Some(JobStatus::Completed), move |state| {
            state.complete(output_path)
        })
        .await
    }

    async fn mark_failed(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        let error = error.to_string();
        self.update(job_id, Some(JobStatus::Failed), move |state| state.fail(error))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryStateStore::new();
        let job_id = JobId::from_string("job-1");

        assert!(store.get(&job_id).await.unwrap().is_none());

        store.set_status(&job_id, JobStatus::Processing).await.unwrap();
        store.set_progress(&job_id, 40).await.unwrap();
        let state = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(state.status, JobStatus::Processing);
        assert_eq!(state.progress, 40);

        store.mark_completed(&job_id, "/out/a.mp4").await.unwrap();
        let state = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.progress, 100);
        assert_eq!(state.output_path.as_deref(), Some("/out/a.mp4"));
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_rejects_illegal_transitions() {
        let store = MemoryStateStore::new();
        let job_id = JobId::from_string("job-2");

        // pending -> completed skips processing
        let err = store
            .set_status(&job_id, JobStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));

        store.set_status(&job_id, JobStatus::Processing).await.unwrap();
        store.mark_failed(&job_id, "decode failed").await.unwrap();

        let err = store
            .set_status(&job_id, JobStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));

        let state = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("decode failed"));
        assert!(state.output_path.is_none());
    }

    #[test]
    fn test_parse_state() {
        let job_id = JobId::from_string("job-3");
        let fields: HashMap<String, String> = [
            ("status", "completed"),
            ("progress", "100"),
            ("output_path", "/out/c.mp4"),
            ("error", ""),
            ("updated_at", "2024-05-01T12:00:00+00:00"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let state = parse_state(&job_id, &fields).unwrap();
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.progress, 100);
        assert_eq!(state.output_path.as_deref(), Some("/out/c.mp4"));
        assert!(state.error.is_none());
        assert_eq!(state.updated_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_parse_state_rejects_unknown_status() {
        let job_id = JobId::from_string("job-4");
        let fields: HashMap<String, String> =
            [("status".to_string(), "exploded".to_string())].into_iter().collect();

        assert!(matches!(
            parse_state(&job_id, &fields),
            Err(QueueError::Serialization(_))
        ));
    }
}

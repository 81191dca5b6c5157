//! Job definitions for queue processing.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};

/// Smallest interpolation factor that produces synthesized frames.
pub const MIN_MULTIPLIER: u32 = 2;
/// Default ceiling on the interpolation factor a job may ask for.
pub const DEFAULT_MAX_MULTIPLIER: u32 = 16;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A frame interpolation job.
///
/// Created by the submitting tier, enqueued once and consumed by exactly one
/// worker. The descriptor is never mutated after it is enqueued; all
/// observable progress lives in [`crate::JobState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpolationJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Source video locator
    pub input_path: String,
    /// Locator the produced video is written to
    pub output_path: String,
    /// Interpolation factor. Absent on the wire when the worker default applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<u32>,
}

impl InterpolationJob {
    /// Create a new job with a generated ID.
    pub fn new(input_path: impl Into<String>, output_path: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            multiplier: None,
        }
    }

    /// Set the job ID.
    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    /// Pin the interpolation factor for this job.
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Interpolation factor to use, falling back to the worker default.
    pub fn effective_multiplier(&self, default: u32) -> u32 {
        self.multiplier.unwrap_or(default)
    }

    /// Check the descriptor before any resource is opened for it.
    ///
    /// The resolved multiplier must lie within `MIN_MULTIPLIER..=max_multiplier`.
    pub fn validate(&self, default_multiplier: u32, max_multiplier: u32) -> ModelResult<()> {
        if self.job_id.as_str().trim().is_empty() {
            return Err(ModelError::invalid_job("job_id is empty"));
        }
        if self.input_path.trim().is_empty() {
            return Err(ModelError::invalid_job("input_path is empty"));
        }
        if self.output_path.trim().is_empty() {
            return Err(ModelError::invalid_job("output_path is empty"));
        }
        if self.input_path == self.output_path {
            return Err(ModelError::invalid_job(
                "input_path and output_path must differ",
            ));
        }

        let multiplier = self.effective_multiplier(default_multiplier);
        if multiplier < MIN_MULTIPLIER {
            return Err(ModelError::invalid_job(format!(
                "multiplier must be at least {}, got {}",
                MIN_MULTIPLIER, multiplier
            )));
        }
        if multiplier > max_multiplier {
            return Err(ModelError::invalid_job(format!(
                "multiplier must be at most {}, got {}",
                max_multiplier, multiplier
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_creation() {
        let job = InterpolationJob::new("/tmp/in.mp4", "/tmp/out.mp4");

        assert!(!job.job_id.as_str().is_empty());
        assert_eq!(job.multiplier, None);
        assert_eq!(job.effective_multiplier(2), 2);
        assert_eq!(job.clone().with_multiplier(4).effective_multiplier(2), 4);
    }

    #[test]
    fn test_wire_format_without_multiplier() {
        let json = r#"{"job_id":"abc","input_path":"/in.mp4","output_path":"/out.mp4"}"#;
        let job: InterpolationJob = serde_json::from_str(json).unwrap();

        assert_eq!(job.job_id, JobId::from_string("abc"));
        assert_eq!(job.multiplier, None);

        let encoded = serde_json::to_string(&job).unwrap();
        assert!(!encoded.contains("multiplier"));
    }

    #[test]
    fn test_wire_format_with_multiplier() {
        let json =
            r#"{"job_id":"abc","input_path":"/in.mp4","output_path":"/out.mp4","multiplier":3}"#;
        let job: InterpolationJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.multiplier, Some(3));
    }

    #[test]
    fn test_validate() {
        let job = InterpolationJob::new("/in.mp4", "/out.mp4");
        assert!(job.validate(2, 16).is_ok());
        assert!(job.validate(1, 16).is_err());
        assert!(job.clone().with_multiplier(1).validate(2, 16).is_err());

        let same = InterpolationJob::new("/a.mp4", "/a.mp4");
        assert!(same.validate(2, 16).is_err());

        let empty = InterpolationJob::new("", "/out.mp4");
        assert!(matches!(empty.validate(2, 16), Err(ModelError::InvalidJob(_))));
    }

    #[test]
    fn test_validate_caps_multiplier() {
        let job = InterpolationJob::new("/in.mp4", "/out.mp4");

        assert!(job.clone().with_multiplier(16).validate(2, 16).is_ok());
        assert!(job.clone().with_multiplier(17).validate(2, 16).is_err());

        let err = job.clone().with_multiplier(u32::MAX).validate(2, DEFAULT_MAX_MULTIPLIER);
        assert!(matches!(err, Err(ModelError::InvalidJob(msg)) if msg.contains("at most 16")));

        // The worker default is held to the same ceiling
        assert!(job.validate(32, 16).is_err());
    }
}

//! Shared data models for the InfiniteFlow interpolation worker.
//!
//! This crate provides Serde-serializable types for:
//! - Interpolation jobs as they travel through the queue
//! - Job status and the observable job state record

pub mod error;
pub mod job;
pub mod job_status;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use job::{InterpolationJob, JobId, DEFAULT_MAX_MULTIPLIER, MIN_MULTIPLIER};
pub use job_status::{JobState, JobStatus};

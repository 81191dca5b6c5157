//! Job queue and job-state store.
//!
//! This crate provides:
//! - A FIFO job queue over a Redis list, with a dead-letter list for
//!   malformed payloads
//! - A job-state store over Redis hashes (`job:<id>`)
//! - In-memory versions of both for tests and local runs

pub mod config;
pub mod error;
pub mod queue;
pub mod state;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, MemoryJobQueue, RedisJobQueue};
pub use state::{JobStateStore, MemoryStateStore, RedisStateStore};

//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "iflow_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "iflow_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "iflow_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "iflow_job_duration_seconds";
    pub const JOBS_IN_FLIGHT: &str = "iflow_jobs_in_flight";

    pub const FRAMES_WRITTEN_TOTAL: &str = "iflow_frames_written_total";
    pub const INTERPOLATED_FRAMES_TOTAL: &str = "iflow_interpolated_frames_total";
    pub const FALLBACK_FRAMES_TOTAL: &str = "iflow_fallback_frames_total";
}

/// Serve `/metrics` on `0.0.0.0:<port>`.
pub fn install_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {e}")))?;

    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

/// Record that a consumer picked up a job.
pub fn record_job_started(consumer: &str) {
    let labels = [("consumer", consumer.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
    gauge!(names::JOBS_IN_FLIGHT).increment(1.0);
}

/// Record a completed job and its frame counters.
pub fn record_job_completed(
    strategy: &str,
    duration_secs: f64,
    frames_written: u64,
    interpolated_frames: u64,
    fallback_frames: u64,
) {
    let labels = [("strategy", strategy.to_string())];

    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &[("status", "completed".to_string())])
        .record(duration_secs);
    counter!(names::FRAMES_WRITTEN_TOTAL).increment(frames_written);
    counter!(names::INTERPOLATED_FRAMES_TOTAL, &labels).increment(interpolated_frames);
    if fallback_frames > 0 {
        counter!(names::FALLBACK_FRAMES_TOTAL, &labels).increment(fallback_frames);
    }
    gauge!(names::JOBS_IN_FLIGHT).decrement(1.0);
}

/// Record a failed job.
pub fn record_job_failed(reason: &str, duration_secs: f64) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &[("status", "failed".to_string())])
        .record(duration_secs);
    gauge!(names::JOBS_IN_FLIGHT).decrement(1.0);
}

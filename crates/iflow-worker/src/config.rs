//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use iflow_media::{EncodingConfig, FrameRatePolicy};
use iflow_models::{DEFAULT_MAX_MULTIPLIER, MIN_MULTIPLIER};
use tracing::warn;

use crate::error::{WorkerError, WorkerResult};

/// Default interpolation factor.
pub const DEFAULT_MULTIPLIER: u32 = 2;
/// Default model location.
pub const DEFAULT_MODEL_PATH: &str = "./models/rife.onnx";
/// Default number of input frames between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10;
/// Default blocking dequeue timeout.
pub const DEFAULT_DEQUEUE_TIMEOUT_SECS: u64 = 10;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interpolation factor for jobs that don't carry one
    pub multiplier: u32,
    /// Largest interpolation factor a job may request
    pub max_multiplier: u32,
    /// Learned model file; `None` selects the linear blend
    pub model_path: Option<PathBuf>,
    /// Prefer GPU inference when the model supports it
    pub use_gpu: bool,
    /// Report progress every N input frames
    pub progress_interval: u64,
    /// How long one dequeue blocks before shutdown is re-checked
    pub dequeue_timeout: Duration,
    /// Independent consumers in this process
    pub concurrency: usize,
    /// Output frame rate rounding
    pub frame_rate_policy: FrameRatePolicy,
    /// Encoder settings
    pub encoding: EncodingConfig,
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            multiplier: DEFAULT_MULTIPLIER,
            max_multiplier: DEFAULT_MAX_MULTIPLIER,
            model_path: Some(PathBuf::from(DEFAULT_MODEL_PATH)),
            use_gpu: true,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            dequeue_timeout: Duration::from_secs(DEFAULT_DEQUEUE_TIMEOUT_SECS),
            concurrency: 1,
            frame_rate_policy: FrameRatePolicy::default(),
            encoding: EncodingConfig::default(),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let model_path = match std::env::var("RIFE_MODEL_PATH") {
            Ok(path) if path.trim().is_empty() => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => defaults.model_path,
        };

        let frame_rate_policy = match std::env::var("FRAME_RATE_POLICY") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                warn!("{}, using {}", e, FrameRatePolicy::default());
                FrameRatePolicy::default()
            }),
            Err(_) => FrameRatePolicy::default(),
        };

        let encoding = EncodingConfig {
            codec: std::env::var("ENCODER_CODEC").unwrap_or(defaults.encoding.codec),
            preset: std::env::var("ENCODER_PRESET").unwrap_or(defaults.encoding.preset),
            crf: env_parse("ENCODER_CRF").unwrap_or(defaults.encoding.crf),
            ..defaults.encoding
        };

        Self {
            multiplier: env_parse("INTERPOLATION_MULTIPLIER").unwrap_or(defaults.multiplier),
            max_multiplier: env_parse("MAX_INTERPOLATION_MULTIPLIER")
                .unwrap_or(defaults.max_multiplier),
            model_path,
            use_gpu: std::env::var("ENABLE_GPU")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.use_gpu),
            progress_interval: env_parse("PROGRESS_INTERVAL_FRAMES")
                .unwrap_or(defaults.progress_interval),
            dequeue_timeout: Duration::from_secs(
                env_parse("QUEUE_DEQUEUE_TIMEOUT_SECS").unwrap_or(DEFAULT_DEQUEUE_TIMEOUT_SECS),
            ),
            concurrency: env_parse("WORKER_CONCURRENCY").unwrap_or(defaults.concurrency),
            frame_rate_policy,
            encoding,
            metrics_port: env_parse("METRICS_PORT"),
        }
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.multiplier < MIN_MULTIPLIER {
            return Err(WorkerError::config_error(format!(
                "INTERPOLATION_MULTIPLIER must be at least {}, got {}",
                MIN_MULTIPLIER, self.multiplier
            )));
        }
        if self.multiplier > self.max_multiplier {
            return Err(WorkerError::config_error(format!(
                "INTERPOLATION_MULTIPLIER {} exceeds MAX_INTERPOLATION_MULTIPLIER {}",
                self.multiplier, self.max_multiplier
            )));
        }
        if self.progress_interval == 0 {
            return Err(WorkerError::config_error(
                "PROGRESS_INTERVAL_FRAMES must be positive",
            ));
        }
        if self.concurrency == 0 {
            return Err(WorkerError::config_error("WORKER_CONCURRENCY must be positive"));
        }
        if self.encoding.crf > 51 {
            return Err(WorkerError::config_error(format!(
                "ENCODER_CRF must be within 0-51, got {}",
                self.encoding.crf
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

//! Frame interpolation worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use iflow_media::{FfmpegCodec, InterpolationStrategy};
use iflow_queue::{QueueConfig, RedisJobQueue, RedisStateStore};
use iflow_worker::{metrics, JobExecutor, PipelineRunner, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for rediss:// URLs)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("iflow=info".parse().unwrap())
        .add_directive("ort=warn".parse().unwrap())
        .add_directive("onnxruntime=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting iflow-worker");

    let config = WorkerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid worker configuration: {}", e);
        std::process::exit(1);
    }
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        if let Err(e) = metrics::install_exporter(port) {
            error!("Failed to start metrics exporter: {}", e);
            std::process::exit(1);
        }
    }

    let codec = FfmpegCodec::new(config.encoding.clone());
    if let Err(e) = FfmpegCodec::check_available() {
        error!("FFmpeg is not usable: {}", e);
        std::process::exit(1);
    }

    let queue_config = QueueConfig::from_env();
    let queue = match RedisJobQueue::new(queue_config.clone()) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.ping().await {
        error!("Redis is unreachable at startup: {}", e);
        std::process::exit(1);
    }

    let store = match RedisStateStore::new(queue_config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create job state store: {}", e);
            std::process::exit(1);
        }
    };

    let strategy =
        InterpolationStrategy::from_model_path(config.model_path.as_deref(), config.use_gpu);
    info!("Interpolation strategy: {}", strategy.name());

    let runner = Arc::new(PipelineRunner::new(
        Arc::new(codec),
        strategy,
        config.progress_interval,
        config.frame_rate_policy,
    ));

    let executor = Arc::new(JobExecutor::from_config(
        &config,
        Arc::new(queue),
        Arc::new(store),
        runner,
    ));

    // Setup signal handler
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, finishing in-flight jobs");
            signal_executor.shutdown();
        }
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

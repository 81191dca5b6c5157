//! Shared fixtures for worker tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use iflow_media::{
    Frame, FrameRatePolicy, InterpolationStrategy, Interpolator, LinearBlend, MediaError,
    MediaResult, MemoryCodec,
};
use iflow_queue::{MemoryJobQueue, MemoryStateStore};
use iflow_worker::{JobQueueConsumer, PipelineRunner, ProgressReporter, WorkerResult};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 6;

/// Uniform gray frames with the given levels.
pub fn gray_frames(levels: &[u8]) -> Vec<Frame> {
    levels
        .iter()
        .map(|&v| Frame::filled(WIDTH, HEIGHT, [v, v, v]))
        .collect()
}

/// `count` frames with levels `0, 10, 20, ..`.
pub fn ramp(count: usize) -> Vec<Frame> {
    let levels: Vec<u8> = (0..count).map(|i| (i * 10 % 250) as u8).collect();
    gray_frames(&levels)
}

/// Level of a uniform frame.
pub fn level(frame: &Frame) -> u8 {
    frame.pixel(0, 0).map(|p| p[0]).unwrap_or_default()
}

pub fn blend_runner(codec: &MemoryCodec) -> PipelineRunner {
    runner_with(codec, InterpolationStrategy::LinearBlend(LinearBlend), 10)
}

pub fn runner_with(
    codec: &MemoryCodec,
    strategy: InterpolationStrategy,
    progress_interval: u64,
) -> PipelineRunner {
    PipelineRunner::new(
        Arc::new(codec.clone()),
        strategy,
        progress_interval,
        FrameRatePolicy::Truncate,
    )
}

/// Collects every reported percentage.
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<u8>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<u8> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn report(&self, progress: u8) -> WorkerResult<()> {
        self.reports.lock().unwrap().push(progress);
        Ok(())
    }
}

/// A model that always errors.
pub struct FailingModel;

impl Interpolator for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    fn interpolate(&self, _a: &Frame, _b: &Frame, _timestep: f32) -> MediaResult<Frame> {
        Err(MediaError::interpolation_failed("inference session lost"))
    }
}

/// Level of every frame `OnePairFailingModel` produces.
pub const MODEL_LEVEL: u8 = 7;

/// A model that errors only when the first frame has level `failing_level`
/// and otherwise returns a uniform `MODEL_LEVEL` frame.
pub struct OnePairFailingModel {
    pub failing_level: u8,
}

impl Interpolator for OnePairFailingModel {
    fn name(&self) -> &str {
        "one-pair-failing"
    }

    fn interpolate(&self, a: &Frame, _b: &Frame, _timestep: f32) -> MediaResult<Frame> {
        if level(a) == self.failing_level {
            return Err(MediaError::interpolation_failed("tensor shape mismatch"));
        }
        Ok(Frame::filled(a.width(), a.height(), [MODEL_LEVEL; 3]))
    }
}

/// A model that panics on every call.
pub struct PanickingModel;

impl Interpolator for PanickingModel {
    fn name(&self) -> &str {
        "panicking"
    }

    fn interpolate(&self, _a: &Frame, _b: &Frame, _timestep: f32) -> MediaResult<Frame> {
        panic!("model exploded");
    }
}

/// Queue, store and codec wired into a consumer.
pub struct Harness {
    pub codec: MemoryCodec,
    pub queue: Arc<MemoryJobQueue>,
    pub store: Arc<MemoryStateStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            codec: MemoryCodec::new(),
            queue: Arc::new(MemoryJobQueue::new()),
            store: Arc::new(MemoryStateStore::new()),
        }
    }

    pub fn consumer(&self, name: &str) -> JobQueueConsumer {
        self.consumer_with(name, InterpolationStrategy::LinearBlend(LinearBlend))
    }

    pub fn consumer_with(&self, name: &str, strategy: InterpolationStrategy) -> JobQueueConsumer {
        JobQueueConsumer::new(
            name,
            self.queue.clone(),
            self.store.clone(),
            Arc::new(runner_with(&self.codec, strategy, 10)),
            2,
            Duration::from_millis(50),
        )
    }
}

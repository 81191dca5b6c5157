//! Per-job interpolation pipeline.
//!
//! Decodes the input, writes every original frame with `multiplier - 1`
//! synthesized frames in front of each one after the first, and commits the
//! encoded output. Output order for inputs `f0..fN`:
//!
//! ```text
//! f0, i(0,1)@1/m .. i(0,1)@(m-1)/m, f1, i(1,2)@1/m .., f2, .., fN
//! ```
//!
//! Stage machine:
//!
//! ```text
//! Idle -> Reading -> { Interpolating -> Writing -> Reading }* -> Finalizing -> Done
//!                                                     any stage -> Failed
//! ```

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use iflow_media::{
    output_frame_rate, EncoderSpec, Frame, FrameCodec, FrameRatePolicy, FrameSink, FrameSource,
    Interpolated, InterpolationStrategy, MediaError, ProgressTracker, StreamInfo,
};

use crate::error::{WorkerError, WorkerResult};

/// Where the pipeline is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Reading,
    Interpolating,
    Writing,
    Finalizing,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Reading => "reading",
            PipelineStage::Interpolating => "interpolating",
            PipelineStage::Writing => "writing",
            PipelineStage::Finalizing => "finalizing",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives progress percentages while a job runs.
///
/// An error aborts the run.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: u8) -> WorkerResult<()>;
}

/// What to interpolate.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub multiplier: u32,
}

/// Counters of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub output_path: PathBuf,
    pub frames_read: u64,
    pub frames_written: u64,
    pub interpolated_frames: u64,
    /// Synthesized frames that fell back to the linear blend
    pub fallback_frames: u64,
    pub output_frame_rate: f64,
}

/// Runs one job from open to commit.
pub struct PipelineRunner {
    codec: Arc<dyn FrameCodec>,
    strategy: InterpolationStrategy,
    progress_interval: u64,
    frame_rate_policy: FrameRatePolicy,
}

impl PipelineRunner {
    pub fn new(
        codec: Arc<dyn FrameCodec>,
        strategy: InterpolationStrategy,
        progress_interval: u64,
        frame_rate_policy: FrameRatePolicy,
    ) -> Self {
        Self {
            codec,
            strategy,
            progress_interval: progress_interval.max(1),
            frame_rate_policy,
        }
    }

    pub fn strategy(&self) -> &InterpolationStrategy {
        &self.strategy
    }

    /// Run the pipeline for `request`.
    ///
    /// On failure every handle is released and nothing is left at the output
    /// path.
    pub async fn run(
        &self,
        request: &PipelineRequest,
        reporter: &dyn ProgressReporter,
    ) -> WorkerResult<PipelineOutcome> {
        let mut stage = StageTracker::default();

        stage.enter(PipelineStage::Reading);
        let mut source = match self.codec.open_decoder(&request.input_path).await {
            Ok(source) => source,
            Err(e) => {
                stage.enter(PipelineStage::Failed);
                return Err(WorkerError::pipeline(PipelineStage::Reading, e));
            }
        };

        let info = *source.info();
        let frame_rate =
            output_frame_rate(info.frame_rate, request.multiplier, self.frame_rate_policy);
        let spec = EncoderSpec::new(frame_rate, info.width, info.height);

        let mut sink = match self.codec.open_encoder(&request.output_path, spec).await {
            Ok(sink) => sink,
            Err(e) => {
                stage.enter(PipelineStage::Failed);
                release_source(source.as_mut()).await;
                return Err(WorkerError::pipeline(PipelineStage::Writing, e));
            }
        };

        debug!(
            "Interpolating {} ({}x{}, {:.3} fps, ~{} frames) x{} -> {} at {} fps with {}",
            request.input_path.display(),
            info.width,
            info.height,
            info.frame_rate,
            info.frame_count,
            request.multiplier,
            request.output_path.display(),
            frame_rate,
            self.strategy.name()
        );

        let mut tracker =
            ProgressTracker::new(info.frame_count, request.multiplier, self.progress_interval);

        let result = self
            .pump(
                source.as_mut(),
                sink.as_mut(),
                &info,
                request.multiplier,
                &mut tracker,
                &mut stage,
                reporter,
            )
            .await;

        let counters = match result {
            Ok(counters) => counters,
            Err(e) => {
                stage.enter(PipelineStage::Failed);
                release_source(source.as_mut()).await;
                abort_sink(sink.as_mut()).await;
                return Err(e);
            }
        };

        stage.enter(PipelineStage::Finalizing);
        release_source(source.as_mut()).await;

        let output_path = match sink.finish().await {
            Ok(path) => path,
            Err(e) => {
                stage.enter(PipelineStage::Failed);
                abort_sink(sink.as_mut()).await;
                return Err(WorkerError::pipeline(PipelineStage::Finalizing, e));
            }
        };

        if let Some(progress) = tracker.finish() {
            reporter.report(progress).await?;
        }
        stage.enter(PipelineStage::Done);

        let snapshot = tracker.snapshot();
        Ok(PipelineOutcome {
            output_path,
            frames_read: snapshot.frames_read,
            frames_written: snapshot.frames_written,
            interpolated_frames: counters.interpolated,
            fallback_frames: counters.fallback,
            output_frame_rate: frame_rate,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        info: &StreamInfo,
        multiplier: u32,
        tracker: &mut ProgressTracker,
        stage: &mut StageTracker,
        reporter: &dyn ProgressReporter,
    ) -> WorkerResult<SynthesisCounters> {
        let mut counters = SynthesisCounters::default();
        let mut previous: Option<Arc<Frame>> = None;

        loop {
            stage.enter(PipelineStage::Reading);
            let frame = match source.next_frame().await {
                Ok(Some(frame)) => Arc::new(frame),
                Ok(None) => break,
                Err(e) => return Err(WorkerError::pipeline(PipelineStage::Reading, e)),
            };

            if frame.dimensions() != info.dimensions() {
                return Err(WorkerError::pipeline(
                    PipelineStage::Reading,
                    MediaError::decode_failed(
                        format!(
                            "frame {} is {}x{}, stream is {}x{}",
                            tracker.snapshot().frames_read + 1,
                            frame.width(),
                            frame.height(),
                            info.width,
                            info.height
                        ),
                        None,
                    ),
                ));
            }

            let mut written = 0u64;

            // One synthesized frame in memory at a time, whatever the multiplier.
            if let Some(prev) = previous.take() {
                for step in 1..multiplier {
                    stage.enter(PipelineStage::Interpolating);
                    let timestep = step as f32 / multiplier as f32;
                    let interpolated =
                        self.synthesize(Arc::clone(&prev), Arc::clone(&frame), timestep).await?;
                    if interpolated.is_fallback() {
                        counters.fallback += 1;
                    }

                    stage.enter(PipelineStage::Writing);
                    sink.write_frame(&interpolated.frame)
                        .await
                        .map_err(|e| WorkerError::pipeline(PipelineStage::Writing, e))?;
                    counters.interpolated += 1;
                    written += 1;
                }
            }

            stage.enter(PipelineStage::Writing);
            sink.write_frame(&frame)
                .await
                .map_err(|e| WorkerError::pipeline(PipelineStage::Writing, e))?;
            written += 1;
            previous = Some(frame);

            if let Some(progress) = tracker.record(written) {
                reporter.report(progress).await?;
            }
        }

        Ok(counters)
    }

    /// The frame at `timestep` between `a` and `b`, computed off the async runtime.
    async fn synthesize(
        &self,
        a: Arc<Frame>,
        b: Arc<Frame>,
        timestep: f32,
    ) -> WorkerResult<Interpolated> {
        let strategy = self.strategy.clone();

        let joined =
            tokio::task::spawn_blocking(move || strategy.interpolate_or_blend(&a, &b, timestep))
                .await;

        match joined {
            Ok(result) => {
                result.map_err(|e| WorkerError::pipeline(PipelineStage::Interpolating, e))
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(WorkerError::job_failed(format!(
                "interpolation task cancelled: {e}"
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct SynthesisCounters {
    interpolated: u64,
    fallback: u64,
}

/// Logs stage transitions.
#[derive(Debug)]
struct StageTracker {
    current: PipelineStage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            current: PipelineStage::Idle,
        }
    }
}

impl StageTracker {
    fn enter(&mut self, next: PipelineStage) {
        if self.current != next {
            debug!(from = %self.current, to = %next, "Pipeline stage transition");
            self.current = next;
        }
    }
}

async fn release_source(source: &mut dyn FrameSource) {
    if let Err(e) = source.close().await {
        warn!("Failed to close decoder: {}", e);
    }
}

async fn abort_sink(sink: &mut dyn FrameSink) {
    if let Err(e) = sink.abort().await {
        warn!(
            "Failed to discard partial output for {}: {}",
            sink.output_path().display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iflow_media::{LinearBlend, MemoryCodec};
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl ProgressReporter for RecordingReporter {
        async fn report(&self, progress: u8) -> WorkerResult<()> {
            self.reports.lock().unwrap().push(progress);
            Ok(())
        }
    }

    fn runner(codec: &MemoryCodec) -> PipelineRunner {
        PipelineRunner::new(
            Arc::new(codec.clone()),
            InterpolationStrategy::LinearBlend(LinearBlend),
            10,
            FrameRatePolicy::Truncate,
        )
    }

    fn request(multiplier: u32) -> PipelineRequest {
        PipelineRequest {
            input_path: PathBuf::from("/in.mp4"),
            output_path: PathBuf::from("/out.mp4"),
            multiplier,
        }
    }

    #[tokio::test]
    async fn test_single_frame_input_is_copied() {
        let codec = MemoryCodec::new();
        codec.add_source("/in.mp4", 30.0, vec![Frame::filled(4, 4, [9, 9, 9])]);

        let reporter = RecordingReporter::default();
        let outcome = runner(&codec).run(&request(4), &reporter).await.unwrap();

        assert_eq!(outcome.frames_read, 1);
        assert_eq!(outcome.frames_written, 1);
        assert_eq!(outcome.interpolated_frames, 0);
        assert_eq!(outcome.output_frame_rate, 120.0);
        assert_eq!(*reporter.reports.lock().unwrap(), vec![100]);
        assert_eq!(codec.output(Path::new("/out.mp4")).unwrap().frames.len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_output_releases_decoder() {
        let codec = MemoryCodec::new();
        codec.add_source("/in.mp4", 24.0, vec![Frame::new(4, 4); 3]);
        codec.reject_output("/out.mp4");

        let err = runner(&codec)
            .run(&request(2), &RecordingReporter::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WorkerError::Pipeline {
                stage: PipelineStage::Writing,
                source: MediaError::UnwritableSink { .. }
            }
        ));
        assert_eq!(codec.open_handles(), 0);
    }
}

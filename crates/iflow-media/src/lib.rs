#![deny(unreachable_patterns)]
//! Frame decoding, encoding and interpolation for the InfiniteFlow worker.
//!
//! This crate provides:
//! - BGR24 frames and stream metadata
//! - A frame codec abstraction with FFmpeg CLI and in-memory implementations
//! - Linear blend interpolation and an optional ONNX Runtime model
//! - Frame-count progress tracking

pub mod codec;
pub mod command;
pub mod encoding;
pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod fs_utils;
pub mod interpolate;
pub mod memory;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod probe;
pub mod progress;

pub use codec::{
    output_frame_rate, EncoderSpec, FrameCodec, FrameRatePolicy, FrameSink, FrameSource,
};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand};
pub use encoding::EncodingConfig;
pub use error::{MediaError, MediaResult};
pub use ffmpeg::{FfmpegCodec, FfmpegDecoder, FfmpegEncoder};
pub use frame::{Frame, StreamInfo};
pub use interpolate::{Interpolated, InterpolationStrategy, Interpolator, LinearBlend};
pub use memory::{EncodedOutput, MemoryCodec};
#[cfg(feature = "onnx")]
pub use onnx::OnnxInterpolator;
pub use probe::probe_stream;
pub use progress::{progress_percent, FrameProgress, ProgressTracker};

//! Frame source and sink abstractions.
//!
//! A [`FrameCodec`] opens a [`FrameSource`] over an input video and a
//! [`FrameSink`] over an output file. Handles must be released explicitly
//! (`close`, `finish` or `abort`); release is idempotent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{MediaError, MediaResult};
use crate::frame::{Frame, StreamInfo};

/// Parameters an encoder is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderSpec {
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
}

impl EncoderSpec {
    pub fn new(frame_rate: f64, width: u32, height: u32) -> Self {
        Self {
            frame_rate,
            width,
            height,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// How the output frame rate is derived from the source rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameRatePolicy {
    /// `trunc(source) * multiplier`, integral
    #[default]
    Truncate,
    /// `source * multiplier`
    Exact,
}

impl FrameRatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameRatePolicy::Truncate => "truncate",
            FrameRatePolicy::Exact => "exact",
        }
    }
}

impl fmt::Display for FrameRatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameRatePolicy {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(FrameRatePolicy::Truncate),
            "exact" => Ok(FrameRatePolicy::Exact),
            other => Err(MediaError::internal(format!(
                "unknown frame rate policy '{}' (expected truncate or exact)",
                other
            ))),
        }
    }
}

/// Output frame rate for a source rate and multiplier.
///
/// Sources slower than 1 fps count as 1 fps under [`FrameRatePolicy::Truncate`].
pub fn output_frame_rate(source_fps: f64, multiplier: u32, policy: FrameRatePolicy) -> f64 {
    match policy {
        FrameRatePolicy::Truncate => {
            let base = if source_fps.is_finite() {
                (source_fps.trunc() as u64).max(1)
            } else {
                1
            };
            (base * multiplier as u64) as f64
        }
        FrameRatePolicy::Exact => source_fps * multiplier as f64,
    }
}

/// Sequential reader of decoded frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Properties of the opened stream.
    fn info(&self) -> &StreamInfo;

    /// Next frame in decode order, or `None` at end of stream.
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>>;

    /// Release the decoder.
    async fn close(&mut self) -> MediaResult<()>;
}

/// Sequential writer of frames into an output file.
#[async_trait]
pub trait FrameSink: Send {
    /// Final path the output lands on after [`FrameSink::finish`].
    fn output_path(&self) -> &Path;

    /// Append one frame.
    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()>;

    /// Flush and commit the output to its final path.
    async fn finish(&mut self) -> MediaResult<PathBuf>;

    /// Stop encoding and discard anything written.
    async fn abort(&mut self) -> MediaResult<()>;
}

/// Factory for frame sources and sinks.
#[async_trait]
pub trait FrameCodec: Send + Sync {
    async fn open_decoder(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>>;

    async fn open_encoder(&self, path: &Path, spec: EncoderSpec)
        -> MediaResult<Box<dyn FrameSink>>;
}

/// Reject a frame whose size differs from what the encoder was opened with.
pub(crate) fn check_frame_dimensions(spec: &EncoderSpec, frame: &Frame) -> MediaResult<()> {
    if frame.dimensions() != spec.dimensions() {
        return Err(MediaError::encode_failed(
            format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                spec.width,
                spec.height
            ),
            None,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_policy() {
        assert_eq!(output_frame_rate(24.0, 2, FrameRatePolicy::Truncate), 48.0);
        assert_eq!(output_frame_rate(29.97, 2, FrameRatePolicy::Truncate), 58.0);
        assert_eq!(output_frame_rate(0.5, 4, FrameRatePolicy::Truncate), 4.0);
    }

    #[test]
    fn test_exact_policy() {
        let fps = output_frame_rate(29.97, 2, FrameRatePolicy::Exact);
        assert!((fps - 59.94).abs() < 1e-9);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("truncate".parse::<FrameRatePolicy>().unwrap(), FrameRatePolicy::Truncate);
        assert_eq!(" EXACT ".parse::<FrameRatePolicy>().unwrap(), FrameRatePolicy::Exact);
        assert!("round".parse::<FrameRatePolicy>().is_err());
    }

    #[test]
    fn test_check_frame_dimensions() {
        let spec = EncoderSpec::new(48.0, 4, 2);
        assert!(check_frame_dimensions(&spec, &Frame::new(4, 2)).is_ok());

        let err = check_frame_dimensions(&spec, &Frame::new(2, 4)).unwrap_err();
        assert!(matches!(err, MediaError::EncodeFailed { .. }));
    }
}

//! In-memory frame codec.
//!
//! Sources are registered up front as frame lists; encoded output is kept per
//! output path. Failures can be injected per path.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::codec::{check_frame_dimensions, EncoderSpec, FrameCodec, FrameSink, FrameSource};
use crate::error::{MediaError, MediaResult};
use crate::frame::{Frame, StreamInfo};

/// Frames committed to an output path.
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub spec: EncoderSpec,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone)]
struct RegisteredSource {
    frame_rate: f64,
    frames: Vec<Frame>,
}

#[derive(Debug, Default)]
struct MemoryState {
    sources: HashMap<PathBuf, RegisteredSource>,
    decode_failures: HashMap<PathBuf, u64>,
    rejected_outputs: HashSet<PathBuf>,
    outputs: HashMap<PathBuf, EncodedOutput>,
    open_handles: usize,
}

/// [`FrameCodec`] backed by process memory.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCodec {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input video.
    pub fn add_source(&self, path: impl Into<PathBuf>, frame_rate: f64, frames: Vec<Frame>) {
        self.state().sources.insert(
            path.into(),
            RegisteredSource {
                frame_rate,
                frames,
            },
        );
    }

    /// Make decoding `path` fail once `frames` frames have been read.
    pub fn fail_decode_after(&self, path: impl Into<PathBuf>, frames: u64) {
        self.state().decode_failures.insert(path.into(), frames);
    }

    /// Make `path` unwritable.
    pub fn reject_output(&self, path: impl Into<PathBuf>) {
        self.state().rejected_outputs.insert(path.into());
    }

    /// Committed output for `path`, if any.
    pub fn output(&self, path: impl AsRef<Path>) -> Option<EncodedOutput> {
        self.state().outputs.get(path.as_ref()).cloned()
    }

    /// Number of decoders and encoders not yet released.
    pub fn open_handles(&self) -> usize {
        self.state().open_handles
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl FrameCodec for MemoryCodec {
    async fn open_decoder(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        let mut state = self.state();

        let source = state
            .sources
            .get(path)
            .cloned()
            .ok_or_else(|| MediaError::unreadable(path, "file not found"))?;
        let fail_after = state.decode_failures.get(path).copied();

        let Some(first) = source.frames.first() else {
            return Err(MediaError::unreadable(path, "no decodable video frames"));
        };
        if fail_after == Some(0) {
            return Err(MediaError::unreadable(path, "corrupt stream"));
        }

        let info = StreamInfo {
            frame_rate: source.frame_rate,
            width: first.width(),
            height: first.height(),
            frame_count: source.frames.len() as u64,
        };

        state.open_handles += 1;
        Ok(Box::new(MemoryDecoder {
            path: path.to_path_buf(),
            info,
            frames: source.frames.into(),
            frames_read: 0,
            fail_after,
            released: false,
            state: Arc::clone(&self.state),
        }))
    }

    async fn open_encoder(
        &self,
        path: &Path,
        spec: EncoderSpec,
    ) -> MediaResult<Box<dyn FrameSink>> {
        let mut state = self.state();

        if state.rejected_outputs.contains(path) {
            return Err(MediaError::unwritable(path, "permission denied"));
        }
        if spec.width == 0 || spec.height == 0 || !(spec.frame_rate > 0.0) {
            return Err(MediaError::unwritable(path, "invalid encoder parameters"));
        }

        state.open_handles += 1;
        Ok(Box::new(MemoryEncoder {
            path: path.to_path_buf(),
            spec,
            frames: Vec::new(),
            released: false,
            committed: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryDecoder {
    path: PathBuf,
    info: StreamInfo,
    frames: VecDeque<Frame>,
    frames_read: u64,
    fail_after: Option<u64>,
    released: bool,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl FrameSource for MemoryDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        if self.fail_after == Some(self.frames_read) {
            return Err(MediaError::decode_failed(
                format!(
                    "corrupt packet in {} after {} frames",
                    self.path.display(),
                    self.frames_read
                ),
                None,
            ));
        }

        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    async fn close(&mut self) -> MediaResult<()> {
        if !self.released {
            self.released = true;
            self.frames.clear();
            lock(&self.state).open_handles -= 1;
        }
        Ok(())
    }
}

struct MemoryEncoder {
    path: PathBuf,
    spec: EncoderSpec,
    frames: Vec<Frame>,
    released: bool,
    committed: bool,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEncoder {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            lock(&self.state).open_handles -= 1;
        }
    }
}

#[async_trait]
impl FrameSink for MemoryEncoder {
    fn output_path(&self) -> &Path {
        &self.path
    }

    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()> {
        if self.released {
            return Err(MediaError::encode_failed("encoder is closed", None));
        }
        check_frame_dimensions(&self.spec, frame)?;
        self.frames.push(frame.clone());
        Ok(())
    }

    async fn finish(&mut self) -> MediaResult<PathBuf> {
        if self.committed {
            return Ok(self.path.clone());
        }
        if self.released {
            return Err(MediaError::encode_failed("encoder was aborted", None));
        }

        self.release();
        if self.frames.is_empty() {
            return Err(MediaError::encode_failed("no frames were written", None));
        }

        let output = EncodedOutput {
            spec: self.spec,
            frames: std::mem::take(&mut self.frames),
        };
        lock(&self.state).outputs.insert(self.path.clone(), output);
        self.committed = true;
        Ok(self.path.clone())
    }

    async fn abort(&mut self) -> MediaResult<()> {
        self.frames.clear();
        self.release();
        Ok(())
    }
}

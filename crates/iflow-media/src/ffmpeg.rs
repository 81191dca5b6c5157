//! FFmpeg-backed frame codec.
//!
//! Decoding spawns `ffmpeg` writing packed BGR24 frames to stdout; encoding
//! spawns `ffmpeg` reading them from stdin. The encoder writes to a hidden
//! partial file and moves it onto the requested path in `finish`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::codec::{check_frame_dimensions, EncoderSpec, FrameCodec, FrameSink, FrameSource};
use crate::command::{check_ffmpeg, check_ffprobe, FfmpegCommand};
use crate::encoding::EncodingConfig;
use crate::error::{MediaError, MediaResult};
use crate::frame::{frame_size, Frame, StreamInfo};
use crate::fs_utils::{move_file, partial_path_for, remove_if_exists};
use crate::probe::probe_stream;

/// Upper bound on retained stderr per process.
const MAX_STDERR_BYTES: usize = 16 * 1024;

/// How long a freshly spawned encoder gets to reject its arguments.
const ENCODER_STARTUP_GRACE: Duration = Duration::from_millis(250);

/// Stderr fragments that mean the output itself is the problem.
const SINK_ERROR_PATTERNS: &[&str] = &[
    "Unknown encoder",
    "Error opening output",
    "Could not open",
    "Permission denied",
    "No such file or directory",
    "Error initializing output stream",
    "Error while opening encoder",
];

/// [`FrameCodec`] over the `ffmpeg`/`ffprobe` command line tools.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCodec {
    encoding: EncodingConfig,
}

impl FfmpegCodec {
    pub fn new(encoding: EncodingConfig) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> &EncodingConfig {
        &self.encoding
    }

    /// Verify both binaries are on `PATH`.
    pub fn check_available() -> MediaResult<()> {
        check_ffmpeg()?;
        check_ffprobe()?;
        Ok(())
    }
}

#[async_trait]
impl FrameCodec for FfmpegCodec {
    async fn open_decoder(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        let decoder = FfmpegDecoder::open(path).await?;
        Ok(Box::new(decoder))
    }

    async fn open_encoder(
        &self,
        path: &Path,
        spec: EncoderSpec,
    ) -> MediaResult<Box<dyn FrameSink>> {
        let encoder = FfmpegEncoder::open(path, spec, &self.encoding).await?;
        Ok(Box::new(encoder))
    }
}

/// Decoder reading raw frames from an `ffmpeg` child.
pub struct FfmpegDecoder {
    path: PathBuf,
    info: StreamInfo,
    frame_bytes: usize,
    frames_read: u64,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<String>>,
    /// First frame, read during `open`
    pending: Option<Frame>,
}

impl FfmpegDecoder {
    /// Probe and open `path`.
    ///
    /// The first frame is decoded here so that an input with no readable
    /// frames fails at open time.
    pub async fn open(path: &Path) -> MediaResult<Self> {
        let info = probe_stream(path).await?;
        debug!(
            "Opening decoder for {}: {}x{} @ {:.3} fps, ~{} frames",
            path.display(),
            info.width,
            info.height,
            info.frame_rate,
            info.frame_count
        );

        let mut child = FfmpegCommand::decode_to_pipe(path)
            .to_command()
            .spawn()
            .map_err(|e| MediaError::unreadable(path, format!("failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("decoder stdout not captured"))?;
        let stderr_task = child.stderr.take().map(spawn_stderr_collector);

        let mut decoder = Self {
            path: path.to_path_buf(),
            info,
            frame_bytes: frame_size(info.width, info.height),
            frames_read: 0,
            child: Some(child),
            stdout: Some(stdout),
            stderr_task,
            pending: None,
        };

        match decoder.read_frame().await {
            Ok(Some(frame)) => {
                decoder.pending = Some(frame);
                Ok(decoder)
            }
            Ok(None) => {
                decoder.close().await?;
                Err(MediaError::unreadable(path, "no decodable video frames"))
            }
            Err(e) => {
                decoder.close().await?;
                let reason = match e.stderr() {
                    Some(stderr) => format!("{}: {}", e, stderr.trim()),
                    None => e.to_string(),
                };
                Err(MediaError::unreadable(path, reason))
            }
        }
    }

    async fn read_frame(&mut self) -> MediaResult<Option<Frame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < buf.len() {
            let n = stdout.read(&mut buf[filled..]).await.map_err(|e| {
                MediaError::decode_failed(format!("reading decoder output: {e}"), None)
            })?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return self.finish_stream().await.map(|_| None);
        }

        if filled < buf.len() {
            let (_, stderr) = self.reap(true).await;
            return Err(MediaError::decode_failed(
                format!(
                    "truncated frame {} in {}: got {} of {} bytes",
                    self.frames_read + 1,
                    self.path.display(),
                    filled,
                    buf.len()
                ),
                stderr,
            ));
        }

        self.frames_read += 1;
        Frame::from_raw(self.info.width, self.info.height, buf).map(Some)
    }

    /// Clean end of stdout: the process must have exited successfully.
    async fn finish_stream(&mut self) -> MediaResult<()> {
        let (status, stderr) = self.reap(false).await;
        match status {
            Some(status) if !status.success() => Err(MediaError::decode_failed(
                format!(
                    "ffmpeg decoder exited with {} after {} frames",
                    status, self.frames_read
                ),
                stderr,
            )),
            _ => {
                trace!(
                    "Decoder for {} reached end of stream after {} frames",
                    self.path.display(),
                    self.frames_read
                );
                Ok(())
            }
        }
    }

    async fn reap(&mut self, kill: bool) -> (Option<ExitStatus>, Option<String>) {
        self.stdout = None;
        let status = reap_child(&mut self.child, kill).await;
        let stderr = collect_stderr(&mut self.stderr_task).await;
        (status, stderr)
    }
}

#[async_trait]
impl FrameSource for FfmpegDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_frame().await
    }

    async fn close(&mut self) -> MediaResult<()> {
        self.pending = None;
        self.reap(true).await;
        Ok(())
    }
}

/// Encoder feeding raw frames to an `ffmpeg` child.
pub struct FfmpegEncoder {
    output_path: PathBuf,
    partial_path: PathBuf,
    spec: EncoderSpec,
    frames_written: u64,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    committed: bool,
}

impl FfmpegEncoder {
    pub async fn open(
        path: &Path,
        spec: EncoderSpec,
        encoding: &EncodingConfig,
    ) -> MediaResult<Self> {
        if spec.width == 0 || spec.height == 0 || !(spec.frame_rate > 0.0) {
            return Err(MediaError::unwritable(
                path,
                format!(
                    "invalid encoder parameters {}x{} @ {} fps",
                    spec.width, spec.height, spec.frame_rate
                ),
            ));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(MediaError::unwritable(
                    path,
                    "parent directory does not exist",
                ));
            }
        }

        let partial_path = partial_path_for(path);
        tokio::fs::File::create(&partial_path)
            .await
            .map_err(|e| MediaError::unwritable(path, e.to_string()))?;

        let spawned = FfmpegCommand::encode_from_pipe(
            &partial_path,
            spec.width,
            spec.height,
            spec.frame_rate,
            encoding,
        )
        .to_command()
        .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                remove_if_exists(&partial_path).await?;
                return Err(MediaError::unwritable(
                    path,
                    format!("failed to spawn ffmpeg: {e}"),
                ));
            }
        };

        let stdin = child.stdin.take();
        let stderr_task = child.stderr.take().map(spawn_stderr_collector);

        let mut encoder = Self {
            output_path: path.to_path_buf(),
            partial_path,
            spec,
            frames_written: 0,
            child: Some(child),
            stdin,
            stderr_task,
            committed: false,
        };

        if encoder.stdin.is_none() {
            encoder.abort().await?;
            return Err(MediaError::internal("encoder stdin not captured"));
        }

        // Argument errors (unknown codec, bad output) end the process at once
        let exited = match encoder.child.as_mut() {
            Some(child) => tokio::time::timeout(ENCODER_STARTUP_GRACE, child.wait())
                .await
                .ok()
                .and_then(Result::ok),
            None => None,
        };
        if let Some(status) = exited {
            encoder.child = None;
            encoder.stdin = None;
            let stderr = collect_stderr(&mut encoder.stderr_task).await;
            remove_if_exists(&encoder.partial_path).await?;
            return Err(MediaError::unwritable(
                path,
                format!(
                    "encoder exited during startup with {}: {}",
                    status,
                    stderr.as_deref().map(str::trim).unwrap_or("no output")
                ),
            ));
        }

        debug!(
            "Opened encoder for {} ({}x{} @ {} fps, codec {})",
            path.display(),
            spec.width,
            spec.height,
            spec.frame_rate,
            encoding.codec
        );
        Ok(encoder)
    }

    /// Turn a dead encoder into an error, classifying by its stderr.
    async fn encoder_died(&mut self, context: String) -> MediaError {
        self.stdin = None;
        let status = reap_child(&mut self.child, true).await;
        let stderr = collect_stderr(&mut self.stderr_task).await;
        let message = match status {
            Some(status) => format!("{context} (ffmpeg exited with {status})"),
            None => context,
        };

        match stderr.as_deref() {
            Some(text) if self.frames_written == 0 && is_sink_error(text) => {
                MediaError::unwritable(&self.output_path, format!("{}: {}", message, text.trim()))
            }
            _ => MediaError::encode_failed(message, stderr),
        }
    }
}

#[async_trait]
impl FrameSink for FfmpegEncoder {
    fn output_path(&self) -> &Path {
        &self.output_path
    }

    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()> {
        check_frame_dimensions(&self.spec, frame)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(MediaError::encode_failed("encoder is closed", None));
        };

        if let Err(e) = stdin.write_all(frame.as_bytes()?).await {
            let context = format!("writing frame {}: {}", self.frames_written + 1, e);
            return Err(self.encoder_died(context).await);
        }

        self.frames_written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> MediaResult<PathBuf> {
        if self.committed {
            return Ok(self.output_path.clone());
        }
        if self.child.is_none() {
            return Err(MediaError::encode_failed("encoder was aborted", None));
        }

        if let Some(mut stdin) = self.stdin.take() {
            // A failed flush shows up in the exit status
            let _ = stdin.shutdown().await;
        }

        let status = reap_child(&mut self.child, false).await;
        let stderr = collect_stderr(&mut self.stderr_task).await;

        let failure = match status {
            Some(status) if status.success() => None,
            Some(status) => Some(format!("ffmpeg encoder exited with {}", status)),
            None => Some("could not wait for ffmpeg encoder".to_string()),
        };
        if let Some(message) = failure {
            remove_if_exists(&self.partial_path).await?;
            return Err(MediaError::encode_failed(message, stderr));
        }

        if self.frames_written == 0 {
            remove_if_exists(&self.partial_path).await?;
            return Err(MediaError::encode_failed("no frames were written", stderr));
        }

        move_file(&self.partial_path, &self.output_path).await?;
        self.committed = true;

        debug!(
            "Encoder committed {} frames to {}",
            self.frames_written,
            self.output_path.display()
        );
        Ok(self.output_path.clone())
    }

    async fn abort(&mut self) -> MediaResult<()> {
        if self.committed {
            return Ok(());
        }
        self.stdin = None;
        reap_child(&mut self.child, true).await;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        remove_if_exists(&self.partial_path).await
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        // The child is killed by kill_on_drop; the partial file is ours to remove
        if !self.committed && self.partial_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.partial_path) {
                warn!(
                    "Failed to remove partial output {}: {}",
                    self.partial_path.display(),
                    e
                );
            }
        }
    }
}

/// Whether encoder stderr points at the output rather than the stream.
pub fn is_sink_error(stderr: &str) -> bool {
    SINK_ERROR_PATTERNS
        .iter()
        .any(|pattern| stderr.contains(pattern))
}

/// Wait for a child to exit, killing it first if requested.
///
/// The child is taken out of the option, so a second call is a no-op.
async fn reap_child(child: &mut Option<Child>, kill: bool) -> Option<ExitStatus> {
    let mut child = child.take()?;
    if kill {
        if let Err(e) = child.start_kill() {
            trace!("ffmpeg already exited: {}", e);
        }
    }
    match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("Failed to wait for ffmpeg: {}", e);
            None
        }
    }
}

fn spawn_stderr_collector(stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = String::new();

        while let Ok(Some(line)) = lines.next_line().await {
            trace!(target: "ffmpeg", "{}", line);
            if collected.len() < MAX_STDERR_BYTES {
                collected.push_str(&line);
                collected.push('\n');
            }
        }

        collected
    })
}

async fn collect_stderr(task: &mut Option<JoinHandle<String>>) -> Option<String> {
    let handle = task.take()?;
    handle.await.ok().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sink_error_classification() {
        assert!(is_sink_error("Unknown encoder 'libnope'"));
        assert!(is_sink_error(
            "/ro/out.mp4: Permission denied\nError opening output files"
        ));
        assert!(!is_sink_error("Conversion failed! broken pipe"));
    }

    #[tokio::test]
    async fn test_encoder_rejects_missing_parent() {
        let err = FfmpegEncoder::open(
            Path::new("/definitely/not/a/dir/out.mp4"),
            EncoderSpec::new(48.0, 4, 4),
            &EncodingConfig::default(),
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(err, MediaError::UnwritableSink { .. }));
    }

    #[tokio::test]
    async fn test_encoder_rejects_invalid_spec() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");

        let err = FfmpegEncoder::open(&out, EncoderSpec::new(0.0, 4, 4), &EncodingConfig::default())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, MediaError::UnwritableSink { .. }));
        assert!(!partial_path_for(&out).exists());
    }

    #[tokio::test]
    async fn test_decoder_missing_input_is_unreadable() {
        let err = FfmpegCodec::default()
            .open_decoder(Path::new("/definitely/not/here.mp4"))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, MediaError::UnreadableSource { .. }));
    }

    fn gradient(width: u32, height: u32, shift: u8) -> Frame {
        let mut frame = Frame::new(width, height);
        for ((y, x, c), v) in frame.array_mut().indexed_iter_mut() {
            *v = ((x * 8 + y * 4 + c * 16) as u8).wrapping_add(shift);
        }
        frame
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_ffmpeg_round_trip() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("clip.mp4");
        let codec = FfmpegCodec::default();

        let mut sink = codec
            .open_encoder(&out, EncoderSpec::new(24.0, 64, 48))
            .await
            .unwrap();
        for i in 0..10u8 {
            sink.write_frame(&gradient(64, 48, i * 10)).await.unwrap();
        }
        assert_eq!(sink.finish().await.unwrap(), out);
        assert!(out.exists());
        assert!(!partial_path_for(&out).exists());

        let mut source = codec.open_decoder(&out).await.unwrap();
        assert_eq!(source.info().dimensions(), (64, 48));

        let mut count = 0;
        while let Some(frame) = source.next_frame().await.unwrap() {
            assert_eq!(frame.dimensions(), (64, 48));
            count += 1;
        }
        source.close().await.unwrap();
        source.close().await.unwrap();
        assert_eq!(count, 10);
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_unknown_codec_is_unwritable() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("clip.mp4");
        let codec = FfmpegCodec::new(EncodingConfig::default().with_codec("libdoesnotexist"));

        let err = codec
            .open_encoder(&out, EncoderSpec::new(24.0, 64, 48))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, MediaError::UnwritableSink { .. }));
        assert!(!out.exists());
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_abort_discards_partial_output() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("clip.mp4");

        let mut sink = FfmpegCodec::default()
            .open_encoder(&out, EncoderSpec::new(24.0, 64, 48))
            .await
            .unwrap();
        sink.write_frame(&gradient(64, 48, 0)).await.unwrap();
        sink.abort().await.unwrap();
        sink.abort().await.unwrap();

        assert!(!out.exists());
        assert!(!partial_path_for(&out).exists());
        assert!(sink.finish().await.is_err());
    }
}

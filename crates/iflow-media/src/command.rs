//! FFmpeg command builder.
//!
//! Both ends of the interpolation pipeline talk to FFmpeg over pipes: the
//! decoder emits packed BGR24 frames on stdout, the encoder consumes them on
//! stdin.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::encoding::EncodingConfig;
use crate::error::{MediaError, MediaResult};

/// Raw pixel format exchanged with FFmpeg.
pub const RAW_PIXEL_FORMAT: &str = "bgr24";

/// Stdin/stdout placeholder.
const PIPE: &str = "-";

/// FFmpeg's own log output is only kept for failure reports.
const LOG_LEVEL: &str = "error";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path (or `-` for stdin)
    input: String,
    /// Output file path (or `-` for stdout)
    output: String,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_string_lossy().to_string(),
            output: output.as_ref().to_string_lossy().to_string(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Decode `input` into packed BGR24 frames on stdout.
    ///
    /// Frames are passed through without duplication or dropping so that the
    /// decoded sequence matches the container's frames one to one. Automatic
    /// rescaling is off: a mid-stream resolution change makes FFmpeg fail
    /// instead of silently resizing to the first frame's size.
    pub fn decode_to_pipe(input: impl AsRef<Path>) -> Self {
        Self::new(input, PIPE)
            // Keep coded dimensions so they match what ffprobe reports
            .input_arg("-noautorotate")
            .output_args(["-an", "-sn", "-dn"])
            .output_args(["-fps_mode", "passthrough"])
            .output_args(["-autoscale", "0"])
            .output_args(["-f", "rawvideo", "-pix_fmt", RAW_PIXEL_FORMAT])
    }

    /// Encode packed BGR24 frames from stdin into `output`.
    pub fn encode_from_pipe(
        output: impl AsRef<Path>,
        width: u32,
        height: u32,
        frame_rate: f64,
        encoding: &EncodingConfig,
    ) -> Self {
        Self::new(PIPE, output)
            .input_args(["-f", "rawvideo", "-pix_fmt", RAW_PIXEL_FORMAT])
            .input_arg("-s")
            .input_arg(format!("{}x{}", width, height))
            .input_arg("-r")
            .input_arg(format_frame_rate(frame_rate))
            .output_arg("-an")
            .output_args(encoding.to_ffmpeg_args())
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string()];

        // Overwrite flag
        if self.overwrite {
            args.push("-y".to_string());
        }

        // Log level
        args.push("-v".to_string());
        args.push(LOG_LEVEL.to_string());

        // Never wait for keyboard input on stdin; stdin may carry frames
        args.push("-nostdin".to_string());

        // Input args
        args.extend(self.input_args.clone());

        // Input file
        args.push("-i".to_string());
        args.push(self.input.clone());

        // Output args
        args.extend(self.output_args.clone());

        // Output file
        args.push(self.output.clone());

        args
    }

    /// Create a tokio command with piped stdio.
    ///
    /// The child is killed if its handle is dropped before it exits.
    pub fn to_command(&self) -> Command {
        let args = self.build_args();
        debug!("Prepared FFmpeg: ffmpeg {}", args.join(" "));

        let mut cmd = Command::new("ffmpeg");
        cmd.args(&args)
            .stdin(if self.input == PIPE {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if self.output == PIPE {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Format a frame rate for `-r`; integral rates are printed without decimals.
pub fn format_frame_rate(frame_rate: f64) -> String {
    if frame_rate.fract() == 0.0 {
        format!("{}", frame_rate as u64)
    } else {
        format!("{:.6}", frame_rate)
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .input_arg("-ss")
            .input_arg("10.000")
            .output_args(["-c:v", "libx264"]);

        let args = cmd.build_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input, "input args must precede -i");
        assert_eq!(args.last().map(String::as_str), Some("output.mp4"));
        assert!(args.contains(&"libx264".to_string()));
    }

    #[test]
    fn test_decode_to_pipe() {
        let args = FfmpegCommand::decode_to_pipe("/videos/in.mp4").build_args();

        assert!(args.contains(&"rawvideo".to_string()));
        assert!(args.contains(&"bgr24".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/videos/in.mp4");

        // Resolution changes must surface as decode errors
        let autoscale = args.iter().position(|a| a == "-autoscale").unwrap();
        assert_eq!(args[autoscale + 1], "0");
        assert!(autoscale > i, "-autoscale is an output option");
    }

    #[test]
    fn test_encode_from_pipe() {
        let args =
            FfmpegCommand::encode_from_pipe("/out.mp4", 640, 480, 48.0, &EncodingConfig::default())
                .build_args();

        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "-");
        let s = args.iter().position(|a| a == "-s").unwrap();
        assert_eq!(args[s + 1], "640x480");
        let r = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[r + 1], "48");
        assert!(s < i && r < i);
        assert_eq!(args.last().map(String::as_str), Some("/out.mp4"));
    }

    #[test]
    fn test_format_frame_rate() {
        assert_eq!(format_frame_rate(48.0), "48");
        assert_eq!(format_frame_rate(59.94), "59.940000");
    }
}

//! FFprobe stream information.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};
use crate::frame::StreamInfo;

/// Frame rate assumed when the container reports none.
const FALLBACK_FRAME_RATE: f64 = 30.0;

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Probe a video file for the properties the decoder needs.
///
/// Every failure is reported as [`MediaError::UnreadableSource`] except a
/// missing `ffprobe` binary.
pub async fn probe_stream(path: impl AsRef<Path>) -> MediaResult<StreamInfo> {
    let path = path.as_ref();

    if !path.is_file() {
        return Err(MediaError::unreadable(path, "file not found"));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::unreadable(
            path,
            format!("ffprobe failed: {}", stderr.trim()),
        ));
    }

    parse_probe_output(&output.stdout).map_err(|reason| MediaError::unreadable(path, reason))
}

/// Turn ffprobe JSON into [`StreamInfo`].
fn parse_probe_output(json: &[u8]) -> Result<StreamInfo, String> {
    let probe: FfprobeOutput =
        serde_json::from_slice(json).map_err(|e| format!("unparseable ffprobe output: {e}"))?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| "no video stream found".to_string())?;

    let width = video_stream.width.unwrap_or(0);
    let height = video_stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(format!("invalid video dimensions {}x{}", width, height));
    }

    let frame_rate = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(FALLBACK_FRAME_RATE);

    // Prefer the container's frame count; estimate from duration otherwise
    let frame_count = video_stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| {
            let duration = video_stream
                .duration
                .as_deref()
                .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
                .and_then(|d| d.parse::<f64>().ok())?;
            Some((duration * frame_rate).round().max(0.0) as u64)
        })
        .unwrap_or(0);

    Ok(StreamInfo {
        frame_rate,
        width,
        height,
        frame_count,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse::<f64>().ok().filter(|fps| *fps > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_probe_output_with_nb_frames() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 480,
                         "avg_frame_rate": "24/1", "r_frame_rate": "24/1", "nb_frames": "10"}],
            "format": {"duration": "0.416667"}
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.dimensions(), (640, 480));
        assert_eq!(info.frame_rate, 24.0);
        assert_eq!(info.frame_count, 10);
    }

    #[test]
    fn test_parse_probe_output_estimates_frame_count() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 320, "height": 240,
                         "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}],
            "format": {"duration": "2.0"}
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_rate, 25.0);
        assert_eq!(info.frame_count, 50);
    }

    #[test]
    fn test_parse_probe_output_rejects_audio_only() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(parse_probe_output(json).is_err());
    }

    #[tokio::test]
    async fn test_probe_missing_file_is_unreadable() {
        let err = probe_stream("/definitely/not/here.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::UnreadableSource { .. }));
    }
}

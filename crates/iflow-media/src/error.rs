//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Unreadable source {path}: {reason}")]
    UnreadableSource { path: PathBuf, reason: String },

    #[error("Unwritable sink {path}: {reason}")]
    UnwritableSink { path: PathBuf, reason: String },

    #[error("Decode failed: {message}")]
    DecodeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Encode failed: {message}")]
    EncodeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Interpolation failed: {0}")]
    InterpolationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an unreadable source error.
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnreadableSource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an unwritable sink error.
    pub fn unwritable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnwritableSink {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a decode failure error.
    pub fn decode_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
            stderr,
        }
    }

    /// Create an encode failure error.
    pub fn encode_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::EncodeFailed {
            message: message.into(),
            stderr,
        }
    }

    /// Create an interpolation failure error.
    pub fn interpolation_failed(message: impl Into<String>) -> Self {
        Self::InterpolationFailed(message.into())
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Captured tool stderr, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::DecodeFailed { stderr, .. } | MediaError::EncodeFailed { stderr, .. } => {
                stderr.as_deref()
            }
            _ => None,
        }
    }
}

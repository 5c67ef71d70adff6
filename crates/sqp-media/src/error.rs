//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use sqp_models::{FrameIndex, MarkerError};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during detection, partitioning and tracking.
///
/// Variants fall into four groups: input errors (`FileNotFound`,
/// `InvalidVideo`, `InvalidMarker`, `FrameNotFound`), resource failures
/// (`SessionInit`), invariant violations (`Consistency`) and plumbing
/// failures (FFmpeg, IO, backend transport).
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Invalid marker: {0}")]
    InvalidMarker(String),

    #[error("Frame {frame} not found at {path}")]
    FrameNotFound { frame: FrameIndex, path: PathBuf },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid mask: {0}")]
    InvalidMask(String),

    #[error("Tracking session failed to initialize: {0}")]
    SessionInit(String),

    #[error("Tracking session in wrong state: {0}")]
    InvalidState(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Segmentation backend error: {0}")]
    Backend(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MarkerError> for MediaError {
    fn from(e: MarkerError) -> Self {
        Self::InvalidMarker(e.to_string())
    }
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn invalid_marker(message: impl Into<String>) -> Self {
        Self::InvalidMarker(message.into())
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn invalid_mask(message: impl Into<String>) -> Self {
        Self::InvalidMask(message.into())
    }

    pub fn session_init(message: impl Into<String>) -> Self {
        Self::SessionInit(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create a consistency (programming invariant) error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Input errors abort the request before anything is persisted.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MediaError::FileNotFound(_)
                | MediaError::InvalidVideo(_)
                | MediaError::InvalidMarker(_)
                | MediaError::FrameNotFound { .. }
        )
    }

    /// Invariant violations that must never be silently resolved.
    pub fn is_consistency_error(&self) -> bool {
        matches!(self, MediaError::Consistency(_))
    }
}

//! Worker error types.

use thiserror::Error;

use sqp_media::MediaError;
use sqp_ml_client::MlError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Video task failed: {0}")]
    TaskFailed(String),

    #[error("Tracking sessions failed to start for chunks {chunks:?}")]
    ChunkSessionsFailed { chunks: Vec<usize> },

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Segmentation service error: {0}")]
    Ml(#[from] MlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn invalid_manifest(msg: impl Into<String>) -> Self {
        Self::InvalidManifest(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    /// Bad video, markers or manifest; resubmitting the same request fails again.
    pub fn is_input_error(&self) -> bool {
        match self {
            WorkerError::InvalidManifest(_) => true,
            WorkerError::Media(e) => e.is_input_error(),
            _ => false,
        }
    }

    /// Label used for failure metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::InvalidManifest(_) => "manifest",
            WorkerError::ConfigError(_) => "config",
            WorkerError::TaskFailed(_) => "task",
            WorkerError::ChunkSessionsFailed { .. } => "session_init",
            WorkerError::Media(MediaError::SessionInit(_)) => "session_init",
            WorkerError::Media(MediaError::Consistency(_)) => "consistency",
            WorkerError::Media(e) if e.is_input_error() => "input",
            WorkerError::Media(_) => "media",
            WorkerError::Ml(_) => "segmenter",
            WorkerError::Io(_) | WorkerError::Json(_) => "io",
        }
    }
}

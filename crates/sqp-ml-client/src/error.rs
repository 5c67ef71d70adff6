//! Segmentation client error types.

use sqp_media::MediaError;
use thiserror::Error;

pub type MlResult<T> = Result<T, MlError>;

#[derive(Debug, Error)]
pub enum MlError {
    #[error("Segmentation service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        /// Delay requested through `Retry-After`
        retry_after_ms: Option<u64>,
    },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Segmentation session not found: {0}")]
    SessionNotFound(String),

    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MlError {
    /// Whether the request can be sent again safely.
    ///
    /// Only failures where the service never processed the request qualify:
    /// prompts accumulate server side, so a replayed prompt is not harmless.
    pub fn is_retryable(&self) -> bool {
        match self {
            MlError::ServiceUnavailable { .. } => true,
            MlError::Network(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            MlError::ServiceUnavailable { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<MlError> for MediaError {
    fn from(e: MlError) -> Self {
        match e {
            MlError::Timeout(secs) => MediaError::Timeout(secs),
            other => MediaError::backend(other.to_string()),
        }
    }
}

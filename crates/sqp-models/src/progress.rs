//! Processing progress for polling callers.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::video::VideoId;

/// Pipeline stage of one video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    /// Waiting for a worker slot
    #[default]
    Queued,
    /// Exporting frames to disk
    Extracting,
    /// Main-view detection (vote + scan passes)
    Detecting,
    /// Splitting runs into chunks
    Partitioning,
    /// Per-chunk tracking sessions
    Tracking,
    /// Linking chunk artifacts into the per-video index
    Merging,
    /// Finished successfully
    Completed,
    /// Aborted with an error
    Failed,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Queued => "queued",
            ProcessingStage::Extracting => "extracting",
            ProcessingStage::Detecting => "detecting",
            ProcessingStage::Partitioning => "partitioning",
            ProcessingStage::Tracking => "tracking",
            ProcessingStage::Merging => "merging",
            ProcessingStage::Completed => "completed",
            ProcessingStage::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStage::Completed | ProcessingStage::Failed)
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a video's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingProgress {
    pub video_id: VideoId,
    pub stage: ProcessingStage,
    /// Overall percentage (0-100), never decreases within a run
    pub percent: f64,
    /// Chunk currently being tracked
    pub chunk: Option<usize>,
    pub total_chunks: usize,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingProgress {
    pub fn queued(video_id: VideoId) -> Self {
        Self {
            video_id,
            stage: ProcessingStage::Queued,
            percent: 0.0,
            chunk: None,
            total_chunks: 0,
            message: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_terminal() {
        assert!(ProcessingStage::Completed.is_terminal());
        assert!(ProcessingStage::Failed.is_terminal());
        assert!(!ProcessingStage::Tracking.is_terminal());
    }

    #[test]
    fn test_stage_serde() {
        let json = serde_json::to_string(&ProcessingStage::Partitioning).unwrap();
        assert_eq!(json, "\"partitioning\"");
    }
}

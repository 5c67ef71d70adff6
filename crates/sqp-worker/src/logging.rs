//! Structured per-video logging utilities.

use tracing::{info, warn, Span};

use sqp_models::VideoId;

/// Logger carrying a video id and operation on every event.
#[derive(Debug, Clone)]
pub struct VideoLogger {
    video_id: String,
    operation: String,
}

impl VideoLogger {
    /// Create a new logger for a video and operation.
    ///
    /// # Arguments
    /// * `video_id` - The video being processed
    /// * `operation` - The type of operation (e.g., "mainview", "segmentation")
    pub fn new(video_id: &VideoId, operation: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video warning: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video completed: {}", message
        );
    }

    /// Span to instrument the video's task with.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "video",
            video_id = %self.video_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_logger_creation() {
        let video_id = VideoId::from_string("final-2024");
        let logger = VideoLogger::new(&video_id, "segmentation");

        let debug = format!("{:?}", logger);
        assert!(debug.contains("final-2024"));
        assert!(debug.contains("segmentation"));
    }
}

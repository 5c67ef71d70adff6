//! FFmpeg progress parsing and per-video progress reporting.

use serde::{Deserialize, Serialize};
use sqp_models::{ProcessingProgress, ProcessingStage, VideoId};
use std::sync::Arc;
use tokio::sync::watch;

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fraction of `total_frames` written so far (0.0 - 1.0).
    pub fn fraction(&self, total_frames: u64) -> f64 {
        if self.is_complete {
            return 1.0;
        }
        if total_frames == 0 {
            return 0.0;
        }
        (self.frame as f64 / total_frames as f64).min(1.0)
    }
}

/// Overall percentage band `[start, end)` a stage occupies.
fn stage_band(stage: ProcessingStage) -> (f64, f64) {
    match stage {
        ProcessingStage::Queued => (0.0, 0.0),
        ProcessingStage::Extracting => (0.0, 10.0),
        ProcessingStage::Detecting => (10.0, 30.0),
        ProcessingStage::Partitioning => (30.0, 32.0),
        ProcessingStage::Tracking => (32.0, 95.0),
        ProcessingStage::Merging => (95.0, 100.0),
        ProcessingStage::Completed => (100.0, 100.0),
        ProcessingStage::Failed => (0.0, 100.0),
    }
}

/// Publishes a monotonically non-decreasing progress percentage.
///
/// Subscribers poll the latest snapshot through a [`watch::Receiver`]; a
/// report that would lower the percentage keeps the previous value.
/// Clones publish to the same channel.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<ProcessingProgress>>,
}

impl ProgressReporter {
    pub fn new(video_id: VideoId) -> Self {
        let (tx, _rx) = watch::channel(ProcessingProgress::queued(video_id));
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessingProgress> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProcessingProgress {
        self.tx.borrow().clone()
    }

    /// Report `fraction` (0.0 - 1.0) of `stage` done.
    pub fn stage(&self, stage: ProcessingStage, fraction: f64) {
        let (start, end) = stage_band(stage);
        let percent = start + (end - start) * fraction.clamp(0.0, 1.0);
        self.tx.send_modify(|p| {
            p.stage = stage;
            p.percent = p.percent.max(percent);
            p.updated_at = chrono::Utc::now();
        });
    }

    /// Report tracking progress for chunk `chunk` of `total_chunks`.
    pub fn chunk(&self, chunk: usize, total_chunks: usize, fraction: f64) {
        let per_chunk = if total_chunks == 0 {
            1.0
        } else {
            1.0 / total_chunks as f64
        };
        let overall = (chunk as f64 + fraction.clamp(0.0, 1.0)) * per_chunk;
        self.stage(ProcessingStage::Tracking, overall);
        self.tx.send_modify(|p| {
            p.chunk = Some(chunk);
            p.total_chunks = total_chunks;
        });
    }

    pub fn message(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|p| p.message = Some(message));
    }

    pub fn complete(&self) {
        self.tx.send_modify(|p| {
            p.stage = ProcessingStage::Completed;
            p.percent = 100.0;
            p.chunk = None;
            p.updated_at = chrono::Utc::now();
        });
    }

    /// Mark the video failed; the percentage stays where it stopped.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|p| {
            p.stage = ProcessingStage::Failed;
            p.message = Some(message);
            p.updated_at = chrono::Utc::now();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_fraction() {
        let progress = FfmpegProgress {
            frame: 250,
            ..Default::default()
        };
        assert!((progress.fraction(1000) - 0.25).abs() < 1e-9);
        assert_eq!(progress.fraction(0), 0.0);

        let done = FfmpegProgress {
            is_complete: true,
            ..Default::default()
        };
        assert_eq!(done.fraction(0), 1.0);
    }

    #[test]
    fn test_reporter_is_monotonic() {
        let reporter = ProgressReporter::new(VideoId::new());
        let rx = reporter.subscribe();

        reporter.stage(ProcessingStage::Detecting, 0.5);
        let after_detect = rx.borrow().percent;
        assert!((after_detect - 20.0).abs() < 1e-9);

        // A late extraction update must not move the bar backwards
        reporter.stage(ProcessingStage::Extracting, 1.0);
        assert!((rx.borrow().percent - after_detect).abs() < 1e-9);

        reporter.chunk(1, 2, 0.0);
        let snap = reporter.snapshot();
        assert_eq!(snap.stage, ProcessingStage::Tracking);
        assert_eq!(snap.chunk, Some(1));
        assert_eq!(snap.total_chunks, 2);
        assert!((snap.percent - 63.5).abs() < 1e-9);

        reporter.complete();
        assert_eq!(reporter.snapshot().percent, 100.0);
        assert!(reporter.snapshot().stage.is_terminal());
    }

    #[test]
    fn test_reporter_fail_keeps_percent() {
        let reporter = ProgressReporter::new(VideoId::new());
        reporter.stage(ProcessingStage::Partitioning, 1.0);
        reporter.fail("boom");
        let snap = reporter.snapshot();
        assert_eq!(snap.stage, ProcessingStage::Failed);
        assert!((snap.percent - 32.0).abs() < 1e-9);
        assert_eq!(snap.message.as_deref(), Some("boom"));
    }
}

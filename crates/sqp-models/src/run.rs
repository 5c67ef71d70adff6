//! Main-view runs and processing chunks.
//!
//! A [`Run`] is a contiguous, inclusive frame range where the dominant
//! broadcast framing was detected. Runs are grouped into capacity-bounded
//! [`Chunk`]s; a chunk boundary may split a run into two adjacent
//! [`SubRun`]s. Both serialize as plain JSON arrays so the persisted
//! record stays compatible with the timeline UI:
//!
//! ```json
//! {"fps": 30.0, "total_frames": 1000,
//!  "timestamps": [[0.0, 13.17, 0, 395]],
//!  "chunks": [[[0, 99]], [[100, 199]]]}
//! ```

use serde::{Deserialize, Serialize};

/// Zero-based positional index into a video's decoded frame sequence.
pub type FrameIndex = u64;

/// Contiguous range of frames sharing the dominant camera framing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64, u64, u64)", into = "(f64, f64, u64, u64)")]
pub struct Run {
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
    /// First frame (inclusive)
    pub start_frame: FrameIndex,
    /// Last frame (inclusive)
    pub end_frame: FrameIndex,
}

impl Run {
    /// Create a run from frame bounds, deriving times from `fps`.
    pub fn from_frames(start_frame: FrameIndex, end_frame: FrameIndex, fps: f64) -> Self {
        let to_secs = |frame: FrameIndex| if fps > 0.0 { frame as f64 / fps } else { 0.0 };
        Self {
            start_time: to_secs(start_frame),
            end_time: to_secs(end_frame),
            start_frame,
            end_frame,
        }
    }

    /// Number of frames covered (inclusive bounds).
    pub fn frame_count(&self) -> u64 {
        self.end_frame.saturating_sub(self.start_frame) + 1
    }

    /// Frame range of this run without timing information.
    pub fn frames(&self) -> SubRun {
        SubRun::new(self.start_frame, self.end_frame)
    }
}

impl From<(f64, f64, u64, u64)> for Run {
    fn from((start_time, end_time, start_frame, end_frame): (f64, f64, u64, u64)) -> Self {
        Self {
            start_time,
            end_time,
            start_frame,
            end_frame,
        }
    }
}

impl From<Run> for (f64, f64, u64, u64) {
    fn from(run: Run) -> Self {
        (run.start_time, run.end_time, run.start_frame, run.end_frame)
    }
}

/// Inclusive frame range of a run, or of the part of a run inside one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u64, u64)", into = "(u64, u64)")]
pub struct SubRun {
    pub start_frame: FrameIndex,
    pub end_frame: FrameIndex,
}

impl SubRun {
    pub fn new(start_frame: FrameIndex, end_frame: FrameIndex) -> Self {
        Self {
            start_frame,
            end_frame,
        }
    }

    /// Number of frames covered (inclusive bounds).
    pub fn frame_count(&self) -> u64 {
        self.end_frame.saturating_sub(self.start_frame) + 1
    }

    /// Whether `frame` lies inside this range.
    pub fn contains(&self, frame: FrameIndex) -> bool {
        frame >= self.start_frame && frame <= self.end_frame
    }

    /// Whether `next` starts exactly one frame after this range ends.
    pub fn touches(&self, next: &SubRun) -> bool {
        self.end_frame + 1 == next.start_frame
    }
}

impl From<(u64, u64)> for SubRun {
    fn from((start_frame, end_frame): (u64, u64)) -> Self {
        Self::new(start_frame, end_frame)
    }
}

impl From<SubRun> for (u64, u64) {
    fn from(sub: SubRun) -> Self {
        (sub.start_frame, sub.end_frame)
    }
}

/// Capacity-bounded group of sub-runs processed in one tracker session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk in the video's chunk list
    pub index: usize,
    /// Ordered, non-overlapping frame ranges
    pub sub_runs: Vec<SubRun>,
}

impl Chunk {
    pub fn new(index: usize, sub_runs: Vec<SubRun>) -> Self {
        Self { index, sub_runs }
    }

    /// Total frames covered by all sub-runs.
    pub fn frame_count(&self) -> u64 {
        self.sub_runs.iter().map(SubRun::frame_count).sum()
    }

    /// First frame of the chunk, if any.
    pub fn first_frame(&self) -> Option<FrameIndex> {
        self.sub_runs.first().map(|s| s.start_frame)
    }

    /// Last frame of the chunk, if any.
    pub fn last_frame(&self) -> Option<FrameIndex> {
        self.sub_runs.last().map(|s| s.end_frame)
    }

    /// Whether `frame` lies inside one of this chunk's sub-runs.
    pub fn contains(&self, frame: FrameIndex) -> bool {
        self.sub_runs.iter().any(|s| s.contains(frame))
    }
}

/// Persisted result of main-view detection and partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainviewRecord {
    /// Frames per second of the source video
    pub fps: f64,
    /// Frames decoded during detection
    pub total_frames: u64,
    /// Detected main-view runs, sorted by start frame
    pub timestamps: Vec<Run>,
    /// Chunk partition of `timestamps`
    pub chunks: Vec<Vec<SubRun>>,
}

impl MainviewRecord {
    pub fn new(fps: f64, total_frames: u64, timestamps: Vec<Run>, chunks: &[Chunk]) -> Self {
        Self {
            fps,
            total_frames,
            timestamps,
            chunks: chunks.iter().map(|c| c.sub_runs.clone()).collect(),
        }
    }

    /// Rebuild typed chunks from the persisted nested arrays.
    pub fn chunk_list(&self) -> Vec<Chunk> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(index, subs)| Chunk::new(index, subs.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_frame_count_inclusive() {
        let run = Run::from_frames(0, 99, 25.0);
        assert_eq!(run.frame_count(), 100);
        assert!((run.end_time - 3.96).abs() < 1e-9);
    }

    #[test]
    fn test_run_serializes_as_array() {
        let run = Run::from_frames(10, 20, 10.0);
        let json = serde_json::to_string(&run).unwrap();
        assert_eq!(json, "[1.0,2.0,10,20]");
        let back: Run = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }

    #[test]
    fn test_sub_run_touches() {
        let a = SubRun::new(0, 99);
        assert!(a.touches(&SubRun::new(100, 120)));
        assert!(!a.touches(&SubRun::new(101, 120)));
    }

    #[test]
    fn test_chunk_contains() {
        let chunk = Chunk::new(0, vec![SubRun::new(0, 9), SubRun::new(20, 29)]);
        assert_eq!(chunk.frame_count(), 20);
        assert!(chunk.contains(25));
        assert!(!chunk.contains(15));
        assert_eq!(chunk.first_frame(), Some(0));
        assert_eq!(chunk.last_frame(), Some(29));
    }

    #[test]
    fn test_mainview_record_shape() {
        let runs = vec![Run::from_frames(0, 249, 25.0)];
        let chunks = vec![
            Chunk::new(0, vec![SubRun::new(0, 99)]),
            Chunk::new(1, vec![SubRun::new(100, 249)]),
        ];
        let record = MainviewRecord::new(25.0, 250, runs, &chunks);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["chunks"][1][0][1], 249);
        assert_eq!(record.chunk_list(), chunks);
    }
}

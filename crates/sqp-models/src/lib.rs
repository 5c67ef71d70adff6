//! Shared data models for squash video analysis.
//!
//! This crate provides Serde-serializable types for:
//! - Main-view runs and capacity-bounded processing chunks
//! - User markers (point/box prompts) and tracked object ids
//! - Run-length encoded masks and bounding boxes
//! - Processing progress published to pollers
//! - Persisted per-video records

pub mod marker;
pub mod mask;
pub mod progress;
pub mod run;
pub mod segmentation;
pub mod video;

// Re-export common types
pub use marker::{BoxPrompt, Marker, MarkerError, ObjectId, Point};
pub use mask::{BBox, RleMask};
pub use progress::{ProcessingProgress, ProcessingStage};
pub use run::{Chunk, FrameIndex, MainviewRecord, Run, SubRun};
pub use segmentation::{ChunkFailure, ObjectFrames, SegmentationSummary};
pub use video::VideoId;

//! Per-video segmentation summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::marker::{Marker, ObjectId};
use crate::run::FrameIndex;

/// Frames for which an object has merged artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFrames {
    /// Sorted global frame indices
    pub frames: Vec<FrameIndex>,
}

/// A chunk whose tracking session could not be started.
///
/// The chunk contributed no artifacts; every other chunk of the video is
/// merged as usual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub chunk: usize,
    pub reason: String,
}

/// Summary written next to the merged results (`segmentation.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentationSummary {
    /// Markers the run was seeded with
    pub markers: Vec<Marker>,
    /// Per-object frame index
    pub objects: BTreeMap<ObjectId, ObjectFrames>,
    /// Chunks left untracked, in chunk order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<ChunkFailure>,
}

impl SegmentationSummary {
    /// Total number of (object, frame) artifacts.
    pub fn artifact_count(&self) -> usize {
        self.objects.values().map(|o| o.frames.len()).sum()
    }

    /// Whether every chunk with markers was tracked.
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

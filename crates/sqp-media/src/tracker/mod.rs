//! Video object tracker adapter.
//!
//! [`TrackingSession`] drives a [`PromptableSegmenter`] backend through the
//! per-chunk lifecycle. Backends are caller-owned handles: the worker builds
//! one per task and shares it with every session it opens.

mod geometry;
mod session;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use sqp_models::{BoxPrompt, ObjectId, Point, RleMask};

use crate::error::MediaResult;
use crate::materialize::FrameSet;

pub use geometry::PromptGeometrySegmenter;
pub use session::{SessionState, TrackingSession};

/// Opaque backend session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub String);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a backend keeps frames and inference state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadPolicy {
    /// Keep decoded video frames in host memory
    pub offload_video_to_cpu: bool,
    /// Keep per-object inference state in host memory
    pub offload_state_to_cpu: bool,
}

/// Coordinate space a backend expects prompts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSpace {
    /// Original frame pixels
    Pixel,
    /// Pixels divided by frame width/height
    Normalized,
}

/// Result of allocating a backend session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub handle: SessionHandle,
    /// Frame height in pixels
    pub height: u32,
    /// Frame width in pixels
    pub width: u32,
}

/// Prompt for one object at one session-local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPrompt {
    /// Session-local frame index
    pub frame_idx: usize,
    pub object_id: ObjectId,
    pub points: Vec<Point>,
    /// 1 = positive, 0 = negative, parallel to `points`
    pub labels: Vec<i32>,
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub box_prompt: Option<BoxPrompt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationDirection {
    Forward,
    Backward,
}

impl PropagationDirection {
    pub fn is_reverse(&self) -> bool {
        matches!(self, PropagationDirection::Backward)
    }
}

/// One propagation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagateRequest {
    /// Session-local frame the sweep starts at (inclusive)
    pub start_frame_idx: usize,
    pub direction: PropagationDirection,
    /// Cap on frames visited, including the start frame
    pub max_frames: Option<usize>,
}

/// Masks produced for one session-local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagatedFrame {
    pub frame_idx: usize,
    pub masks: BTreeMap<ObjectId, RleMask>,
}

/// Stateful promptable video segmentation backend.
#[async_trait]
pub trait PromptableSegmenter: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Coordinate space prompts are sent in.
    fn point_space(&self) -> PointSpace {
        PointSpace::Pixel
    }

    /// Allocate a session over exactly the frames in `frames`.
    async fn init_state(&self, frames: &FrameSet, offload: OffloadPolicy) -> MediaResult<SessionInfo>;

    /// Register a prompt and return the object's mask at that frame.
    async fn add_prompt(&self, session: &SessionHandle, prompt: &ObjectPrompt) -> MediaResult<RleMask>;

    /// Drop every prompt for `object_id` at `frame_idx`.
    async fn clear_prompts(
        &self,
        session: &SessionHandle,
        frame_idx: usize,
        object_id: &ObjectId,
    ) -> MediaResult<()>;

    /// Run one sweep and return every frame it visited.
    async fn propagate(
        &self,
        session: &SessionHandle,
        request: PropagateRequest,
    ) -> MediaResult<Vec<PropagatedFrame>>;

    /// Clear all prompts and tracking state, keeping the session allocated.
    async fn reset_state(&self, session: &SessionHandle) -> MediaResult<()>;

    /// Free the session.
    async fn release(&self, session: &SessionHandle) -> MediaResult<()>;
}

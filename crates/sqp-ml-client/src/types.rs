//! Segmentation service request/response types.
//!
//! Frame indices on the wire are session-local: positions in the
//! `frame_names` list the session was created with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use sqp_models::{ObjectId, RleMask};

/// Create a session over a staged frame directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Directory holding the staged frames
    pub frames_dir: String,
    /// File names in session order
    pub frame_names: Vec<String>,
    #[serde(default)]
    pub offload_video_to_cpu: bool,
    #[serde(default)]
    pub offload_state_to_cpu: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub height: u32,
    pub width: u32,
}

/// Point/box prompt for one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPromptRequest {
    pub frame_idx: usize,
    pub obj_id: ObjectId,
    /// `[x, y]` pairs
    pub points: Vec<[f64; 2]>,
    pub labels: Vec<i32>,
    /// `[x_min, y_min, x_max, y_max]`
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub box_prompt: Option<[f64; 4]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPromptResponse {
    pub frame_idx: usize,
    pub obj_id: ObjectId,
    pub mask: RleMask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearPromptsRequest {
    pub frame_idx: usize,
    pub obj_id: ObjectId,
}

/// One propagation sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagateBody {
    pub start_frame_idx: usize,
    pub reverse: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frame_num_to_track: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMasks {
    pub frame_idx: usize,
    #[serde(default)]
    pub masks: BTreeMap<ObjectId, RleMask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagateResponse {
    pub frames: Vec<FrameMasks>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}

//! User markers that seed tracking for one object at one frame.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::run::FrameIndex;

/// Stable, caller-supplied label of a tracked object (e.g. `"1"`, `"player1"`).
///
/// Ids are never generated by the pipeline: the same label must be used in
/// every chunk that contains the same physical player.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the label can name a single artifact directory.
    ///
    /// Only ASCII letters, digits, `-`, `_` and `.` are allowed, and the
    /// label must not be `.` or `..`.
    pub fn is_path_safe(&self) -> bool {
        let label = self.as_str();
        !label.is_empty()
            && label != "."
            && label != ".."
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u32> for ObjectId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

/// Pixel coordinate in the original (uncropped) frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x >= 0.0 && self.y >= 0.0
    }
}

/// Box prompt in original pixel coordinates (corners, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoxPrompt {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoxPrompt {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    fn is_valid(&self) -> bool {
        Point::new(self.x_min, self.y_min).is_valid()
            && Point::new(self.x_max, self.y_max).is_valid()
            && self.x_min <= self.x_max
            && self.y_min <= self.y_max
    }
}

/// Errors raised when validating a marker.
#[derive(Debug, Error, PartialEq)]
pub enum MarkerError {
    #[error("Marker for object {object_id} at frame {frame_idx} has no points and no box")]
    EmptyPrompt { frame_idx: FrameIndex, object_id: ObjectId },

    #[error("Marker for object {object_id} at frame {frame_idx} has an invalid coordinate")]
    InvalidCoordinate { frame_idx: FrameIndex, object_id: ObjectId },

    #[error("Marker object id must not be empty (frame {0})")]
    EmptyObjectId(FrameIndex),

    #[error("Marker object id {object_id:?} at frame {frame_idx} must use only letters, digits, '-', '_' and '.'")]
    UnsafeObjectId { frame_idx: FrameIndex, object_id: ObjectId },
}

/// Point/box prompt for one object at one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Marker {
    /// Target frame (global video frame index)
    pub frame_idx: FrameIndex,
    /// Tracked object label
    pub object_id: ObjectId,
    /// Points on the object
    #[serde(default)]
    pub positive_points: Vec<Point>,
    /// Points on the background / other objects
    #[serde(default)]
    pub negative_points: Vec<Point>,
    /// Optional box around the object
    #[serde(default, rename = "box", skip_serializing_if = "Option::is_none")]
    pub box_prompt: Option<BoxPrompt>,
}

impl Marker {
    /// Marker with positive points only.
    pub fn positive(frame_idx: FrameIndex, object_id: impl Into<ObjectId>, points: Vec<Point>) -> Self {
        Self {
            frame_idx,
            object_id: object_id.into(),
            positive_points: points,
            negative_points: Vec::new(),
            box_prompt: None,
        }
    }

    /// Add negative points.
    pub fn with_negative(mut self, points: Vec<Point>) -> Self {
        self.negative_points = points;
        self
    }

    /// Add a box prompt.
    pub fn with_box(mut self, box_prompt: BoxPrompt) -> Self {
        self.box_prompt = Some(box_prompt);
        self
    }

    /// Check that the marker carries a usable prompt.
    pub fn validate(&self) -> Result<(), MarkerError> {
        if self.object_id.as_str().trim().is_empty() {
            return Err(MarkerError::EmptyObjectId(self.frame_idx));
        }
        if !self.object_id.is_path_safe() {
            return Err(MarkerError::UnsafeObjectId {
                frame_idx: self.frame_idx,
                object_id: self.object_id.clone(),
            });
        }
        if self.positive_points.is_empty()
            && self.negative_points.is_empty()
            && self.box_prompt.is_none()
        {
            return Err(MarkerError::EmptyPrompt {
                frame_idx: self.frame_idx,
                object_id: self.object_id.clone(),
            });
        }
        let points_ok = self
            .positive_points
            .iter()
            .chain(self.negative_points.iter())
            .all(Point::is_valid);
        let box_ok = self.box_prompt.map_or(true, |b| b.is_valid());
        if !points_ok || !box_ok {
            return Err(MarkerError::InvalidCoordinate {
                frame_idx: self.frame_idx,
                object_id: self.object_id.clone(),
            });
        }
        Ok(())
    }

    /// Points with segmentation labels (1 = positive, 0 = negative).
    pub fn labelled_points(&self) -> (Vec<Point>, Vec<i32>) {
        let points = self
            .positive_points
            .iter()
            .chain(self.negative_points.iter())
            .copied()
            .collect();
        let labels = std::iter::repeat(1)
            .take(self.positive_points.len())
            .chain(std::iter::repeat(0).take(self.negative_points.len()))
            .collect();
        (points, labels)
    }
}

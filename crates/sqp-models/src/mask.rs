//! Mask and bounding box wire types.
//!
//! Encoding/decoding lives in `sqp-media::mask`; these are the shapes that
//! get persisted and sent over the wire.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Run-length encoded binary mask.
///
/// `counts` holds space-separated run lengths over the row-major flattened
/// mask, alternating off/on and always starting with an "off" run (which is
/// zero-length when the first pixel is set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RleMask {
    /// `[height, width]`
    pub size: [u32; 2],
    pub counts: String,
}

impl RleMask {
    pub fn height(&self) -> u32 {
        self.size[0]
    }

    pub fn width(&self) -> u32 {
        self.size[1]
    }

    /// All-false mask: a single full-length "off" run.
    pub fn empty(height: u32, width: u32) -> Self {
        Self {
            size: [height, width],
            counts: (height as u64 * width as u64).to_string(),
        }
    }
}

/// Axis-aligned bounding box `[x_min, y_min, width, height]` in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct BBox(pub [u32; 4]);

impl BBox {
    /// Box of an all-false mask.
    pub const EMPTY: BBox = BBox([0, 0, 0, 0]);

    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self([x, y, width, height])
    }

    pub fn x(&self) -> u32 {
        self.0[0]
    }

    pub fn y(&self) -> u32 {
        self.0[1]
    }

    pub fn width(&self) -> u32 {
        self.0[2]
    }

    pub fn height(&self) -> u32 {
        self.0[3]
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_rle() {
        let rle = RleMask::empty(4, 5);
        assert_eq!(rle.counts, "20");
        assert_eq!(rle.height(), 4);
        assert_eq!(rle.width(), 5);
    }

    #[test]
    fn test_bbox_json() {
        let bbox = BBox::new(1, 2, 3, 4);
        assert_eq!(serde_json::to_string(&bbox).unwrap(), "[1,2,3,4]");
        assert!(BBox::EMPTY.is_empty());
        assert!(!bbox.is_empty());
    }
}

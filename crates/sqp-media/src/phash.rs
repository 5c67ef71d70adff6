//! DCT perceptual hash of grayscale frame crops.
//!
//! The crop is resized to 32x32, transformed with a 2-D DCT-II, and the
//! top-left 8x8 low-frequency block is thresholded against its median.
//! Bits are packed row-major, most significant bit first.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use rustdct::{DctPlanner, TransformType2And3};
use std::fmt;
use std::sync::Arc;

use crate::error::{MediaError, MediaResult};

const RESIZE: usize = 32;
const LOW_FREQ: usize = 8;

/// 64-bit perceptual fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Hamming distance between two fingerprints.
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Similar iff `distance <= max_distance`.
    pub fn is_similar(&self, other: &PerceptualHash, max_distance: u32) -> bool {
        self.distance(other) <= max_distance
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Reusable hasher holding a planned 32-point DCT.
pub struct PhashEngine {
    dct: Arc<dyn TransformType2And3<f32>>,
}

impl fmt::Debug for PhashEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhashEngine").field("size", &RESIZE).finish()
    }
}

impl Default for PhashEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhashEngine {
    pub fn new() -> Self {
        let mut planner = DctPlanner::new();
        Self {
            dct: planner.plan_dct2(RESIZE),
        }
    }

    /// Hash an 8-bit luma image given as row-major pixels.
    pub fn hash_luma(&self, pixels: &[u8], width: u32, height: u32) -> MediaResult<PerceptualHash> {
        if width == 0 || height == 0 {
            return Err(MediaError::InvalidVideo(format!(
                "cannot hash an empty {}x{} image",
                width, height
            )));
        }

        let view: ImageBuffer<Luma<u8>, &[u8]> = ImageBuffer::from_raw(width, height, pixels)
            .ok_or_else(|| {
                MediaError::internal(format!(
                    "luma buffer of {} bytes is too small for {}x{}",
                    pixels.len(),
                    width,
                    height
                ))
            })?;

        let small = imageops::resize(&view, RESIZE as u32, RESIZE as u32, FilterType::Lanczos3);
        let mut coeffs: Vec<f32> = small.as_raw().iter().map(|&p| p as f32).collect();

        self.dct_2d(&mut coeffs);
        Ok(PerceptualHash(pack_low_frequencies(&coeffs)))
    }

    /// Row transform, transpose, row transform, transpose back.
    fn dct_2d(&self, coeffs: &mut [f32]) {
        for row in coeffs.chunks_exact_mut(RESIZE) {
            self.dct.process_dct2(row);
        }
        transpose(coeffs);
        for row in coeffs.chunks_exact_mut(RESIZE) {
            self.dct.process_dct2(row);
        }
        transpose(coeffs);
    }
}

fn transpose(square: &mut [f32]) {
    for row in 0..RESIZE {
        for col in (row + 1)..RESIZE {
            square.swap(row * RESIZE + col, col * RESIZE + row);
        }
    }
}

fn pack_low_frequencies(coeffs: &[f32]) -> u64 {
    let mut block = [0f32; LOW_FREQ * LOW_FREQ];
    for row in 0..LOW_FREQ {
        for col in 0..LOW_FREQ {
            block[row * LOW_FREQ + col] = coeffs[row * RESIZE + col];
        }
    }

    let mut sorted = block;
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = (sorted[mid - 1] + sorted[mid]) / 2.0;

    block
        .iter()
        .fold(0u64, |bits, &c| (bits << 1) | u64::from(c > median))
}

/// Hash a luma image with a freshly planned engine.
pub fn phash(pixels: &[u8], width: u32, height: u32) -> MediaResult<PerceptualHash> {
    PhashEngine::new().hash_luma(pixels, width, height)
}

/// Hamming distance between two fingerprints.
pub fn distance(a: PerceptualHash, b: PerceptualHash) -> u32 {
    a.distance(&b)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Blocky luma pattern standing in for a court view.
    pub(crate) fn court_pattern(width: u32, height: u32) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let fx = x as f32 / width as f32;
                let fy = y as f32 / height as f32;
                let mut v = 30u8;
                if fx < 0.37 && fy < 0.42 {
                    v += 160;
                }
                if fx >= 0.71 && fy >= 0.18 {
                    v += 50;
                }
                pixels.push(v);
            }
        }
        pixels
    }

    pub(crate) fn inverted(pixels: &[u8]) -> Vec<u8> {
        pixels.iter().map(|p| 255 - p).collect()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let engine = PhashEngine::new();
        let pixels = court_pattern(96, 40);
        let a = engine.hash_luma(&pixels, 96, 40).unwrap();
        let b = engine.hash_luma(&pixels, 96, 40).unwrap();
        assert_eq!(a, b);
        assert_eq!(distance(a, a), 0);
        assert_eq!(phash(&pixels, 96, 40).unwrap(), a);
    }

    #[test]
    fn test_brightness_shift_is_similar() {
        let engine = PhashEngine::new();
        let pixels = court_pattern(96, 40);
        let brighter: Vec<u8> = pixels.iter().map(|p| p + 3).collect();
        let a = engine.hash_luma(&pixels, 96, 40).unwrap();
        let b = engine.hash_luma(&brighter, 96, 40).unwrap();
        assert!(a.is_similar(&b, 10), "distance {}", a.distance(&b));
    }

    #[test]
    fn test_different_framing_is_far() {
        let engine = PhashEngine::new();
        let pixels = court_pattern(96, 40);
        let a = engine.hash_luma(&pixels, 96, 40).unwrap();
        let b = engine.hash_luma(&inverted(&pixels), 96, 40).unwrap();
        assert!(a.distance(&b) > 10, "distance {}", a.distance(&b));
    }

    #[test]
    fn test_empty_image_rejected() {
        assert!(phash(&[], 0, 0).is_err());
        assert!(phash(&[1, 2, 3], 4, 4).is_err());
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(PerceptualHash(0xff).to_string(), "00000000000000ff");
    }
}

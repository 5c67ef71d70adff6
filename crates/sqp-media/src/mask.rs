//! Binary mask codec: bounding boxes and run-length encoding.
//!
//! Masks are flattened row-major. Run lengths alternate off/on and always
//! start with an "off" run, which is zero-length when the first pixel is
//! set. Counts are written space separated; the decoder accepts any
//! non-digit separator.

use ndarray::Array2;
use sqp_models::{BBox, RleMask};

use crate::error::{MediaError, MediaResult};

/// Per-pixel object occupancy, indexed `[row, col]`.
pub type BinaryMask = Array2<bool>;

/// Bounding box `[x_min, y_min, width, height]` of the set pixels.
///
/// Width and height count pixels inclusively, so a single set pixel gives a
/// `1x1` box. An all-false mask yields [`BBox::EMPTY`].
pub fn mask_to_bbox(mask: &BinaryMask) -> BBox {
    let mut bounds: Option<(usize, usize, usize, usize)> = None;

    for ((row, col), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        bounds = Some(match bounds {
            None => (col, row, col, row),
            Some((x0, y0, x1, y1)) => (x0.min(col), y0.min(row), x1.max(col), y1.max(row)),
        });
    }

    match bounds {
        Some((x0, y0, x1, y1)) => BBox::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0 + 1) as u32,
            (y1 - y0 + 1) as u32,
        ),
        None => BBox::EMPTY,
    }
}

/// Run lengths of a mask, starting with an "off" run.
pub fn rle_counts(mask: &BinaryMask) -> Vec<u64> {
    let mut counts = Vec::new();
    let mut current = false;
    let mut run = 0u64;

    // Row-major regardless of memory layout
    for &pixel in mask.iter() {
        if pixel != current {
            counts.push(run);
            run = 0;
            current = pixel;
        }
        run += 1;
    }
    counts.push(run);
    counts
}

/// Encode a mask into its wire form.
pub fn encode_rle(mask: &BinaryMask) -> RleMask {
    let (height, width) = mask.dim();
    let counts = rle_counts(mask)
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    RleMask {
        size: [height as u32, width as u32],
        counts,
    }
}

/// Parse a counts string, splitting on any non-digit characters.
pub fn parse_counts(counts: &str) -> MediaResult<Vec<u64>> {
    counts
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|e| MediaError::invalid_mask(format!("bad run length {:?}: {}", s, e)))
        })
        .collect()
}

/// Decode the wire form back into a mask.
///
/// Runs must cover `height * width` pixels exactly.
pub fn decode_rle(rle: &RleMask) -> MediaResult<BinaryMask> {
    let height = rle.height() as usize;
    let width = rle.width() as usize;
    let total = height * width;

    let mut flat = vec![false; total];
    let mut pos = 0usize;
    let mut value = false;

    for run in parse_counts(&rle.counts)? {
        let run = run as usize;
        let end = pos
            .checked_add(run)
            .filter(|end| *end <= total)
            .ok_or_else(|| {
                MediaError::invalid_mask(format!(
                    "runs overrun a {}x{} mask at offset {}",
                    height, width, pos
                ))
            })?;
        if value {
            flat[pos..end].fill(true);
        }
        pos = end;
        value = !value;
    }

    if pos != total {
        return Err(MediaError::invalid_mask(format!(
            "runs cover {} of {} pixels",
            pos, total
        )));
    }

    Array2::from_shape_vec((height, width), flat)
        .map_err(|e| MediaError::invalid_mask(e.to_string()))
}

/// Bounding box computed straight from the runs without decoding.
pub fn rle_bbox(rle: &RleMask) -> MediaResult<BBox> {
    let width = rle.width() as u64;
    if width == 0 {
        return Ok(BBox::EMPTY);
    }

    let mut bounds: Option<(u64, u64, u64, u64)> = None;
    let mut pos = 0u64;
    let mut value = false;

    for run in parse_counts(&rle.counts)? {
        if value && run > 0 {
            let first = pos;
            let last = pos + run - 1;
            let (row0, row1) = (first / width, last / width);
            let (col0, col1) = if row0 == row1 {
                (first % width, last % width)
            } else {
                (0, width - 1)
            };
            bounds = Some(match bounds {
                None => (col0, row0, col1, row1),
                Some((x0, y0, x1, y1)) => (x0.min(col0), y0.min(row0), x1.max(col1), y1.max(row1)),
            });
        }
        pos += run;
        value = !value;
    }

    Ok(match bounds {
        Some((x0, y0, x1, y1)) => BBox::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0 + 1) as u32,
            (y1 - y0 + 1) as u32,
        ),
        None => BBox::EMPTY,
    })
}

/// Whether the encoded mask has at least one set pixel.
pub fn rle_is_empty(rle: &RleMask) -> MediaResult<bool> {
    Ok(parse_counts(&rle.counts)?
        .iter()
        .skip(1)
        .step_by(2)
        .all(|run| *run == 0))
}

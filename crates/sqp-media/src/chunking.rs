//! Capacity-bounded partitioning of main-view runs into chunks.

use sqp_models::{Chunk, FrameIndex, Marker, Run, SubRun};

use crate::error::{MediaError, MediaResult};

/// Greedily pack `runs` into chunks of at most `capacity` frames.
///
/// A run that does not fit is split at the exact frame that fills the
/// current chunk; the remainder continues in the next chunk, as many times
/// as needed. Runs must be sorted and non-overlapping.
pub fn partition_runs(runs: &[Run], capacity: u64) -> MediaResult<Vec<Chunk>> {
    if capacity == 0 {
        return Err(MediaError::invalid_config("chunk capacity must be positive"));
    }
    check_ordered(runs)?;

    let mut chunks = Vec::new();
    let mut current: Vec<SubRun> = Vec::new();
    let mut filled = 0u64;

    for run in runs {
        let mut start = run.start_frame;
        let end = run.end_frame;

        loop {
            let remaining = end - start + 1;
            let room = capacity - filled;

            if remaining <= room {
                current.push(SubRun::new(start, end));
                filled += remaining;
                if filled == capacity {
                    chunks.push(Chunk::new(chunks.len(), std::mem::take(&mut current)));
                    filled = 0;
                }
                break;
            }

            let split_end = start + room - 1;
            current.push(SubRun::new(start, split_end));
            chunks.push(Chunk::new(chunks.len(), std::mem::take(&mut current)));
            filled = 0;
            start = split_end + 1;
        }
    }

    if !current.is_empty() {
        chunks.push(Chunk::new(chunks.len(), current));
    }

    Ok(chunks)
}

fn check_ordered(runs: &[Run]) -> MediaResult<()> {
    for run in runs {
        if run.start_frame > run.end_frame {
            return Err(MediaError::consistency(format!(
                "run [{}, {}] ends before it starts",
                run.start_frame, run.end_frame
            )));
        }
    }
    for pair in runs.windows(2) {
        if pair[1].start_frame <= pair[0].end_frame {
            return Err(MediaError::consistency(format!(
                "runs [{}, {}] and [{}, {}] overlap or are unsorted",
                pair[0].start_frame, pair[0].end_frame, pair[1].start_frame, pair[1].end_frame
            )));
        }
    }
    Ok(())
}

/// Merge touching ranges so a split run compares equal to its source.
fn coalesce(ranges: impl IntoIterator<Item = SubRun>) -> Vec<SubRun> {
    let mut merged: Vec<SubRun> = Vec::new();
    for range in ranges {
        match merged.last_mut() {
            Some(last) if last.touches(&range) => last.end_frame = range.end_frame,
            _ => merged.push(range),
        }
    }
    merged
}

/// Check that `chunks` tile `runs` exactly, in order.
pub fn validate_tiling(runs: &[Run], chunks: &[Chunk]) -> MediaResult<()> {
    let expected = coalesce(runs.iter().map(Run::frames));
    let actual = coalesce(chunks.iter().flat_map(|c| c.sub_runs.iter().copied()));

    if expected != actual {
        return Err(MediaError::consistency(format!(
            "chunks cover {:?} but runs cover {:?}",
            actual, expected
        )));
    }
    Ok(())
}

/// Chunk whose sub-runs contain `frame`.
pub fn chunk_for_frame(chunks: &[Chunk], frame: FrameIndex) -> Option<&Chunk> {
    chunks.iter().find(|c| c.contains(frame))
}

/// Assign each marker to the chunk containing its frame.
///
/// The result has one entry per chunk, in chunk order. A marker outside
/// every chunk can never be materialized and is rejected.
pub fn group_markers(chunks: &[Chunk], markers: &[Marker]) -> MediaResult<Vec<Vec<Marker>>> {
    let mut groups = vec![Vec::new(); chunks.len()];
    for marker in markers {
        marker.validate()?;
        let chunk = chunk_for_frame(chunks, marker.frame_idx).ok_or_else(|| {
            MediaError::invalid_marker(format!(
                "frame {} of object {} is outside every main-view chunk",
                marker.frame_idx, marker.object_id
            ))
        })?;
        groups[chunk.index].push(marker.clone());
    }
    Ok(groups)
}

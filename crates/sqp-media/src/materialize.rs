//! Per-chunk frame working sets.
//!
//! A chunk's tracker session only ever sees the frames staged here: every
//! `every_n_frame`-th frame of each sub-run plus every annotated frame.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use sqp_models::{Chunk, FrameIndex, Marker};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::link_or_copy;

/// File name of an extracted frame.
pub fn frame_file_name(frame: FrameIndex) -> String {
    format!("{:06}.jpg", frame)
}

/// Working directory of chunk `index` under the segmentation directory.
pub fn chunk_dir(segmentation_dir: impl AsRef<Path>, index: usize) -> PathBuf {
    segmentation_dir.as_ref().join(format!("chunk_{}", index))
}

/// Sorted global frame indices staged in one directory.
///
/// Position in `frames` is the session-local index the tracker uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSet {
    dir: PathBuf,
    frames: Vec<FrameIndex>,
}

impl FrameSet {
    pub fn new(dir: impl Into<PathBuf>, frames: impl IntoIterator<Item = FrameIndex>) -> Self {
        let frames: BTreeSet<FrameIndex> = frames.into_iter().collect();
        Self {
            dir: dir.into(),
            frames: frames.into_iter().collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames(&self) -> &[FrameIndex] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, frame: FrameIndex) -> bool {
        self.frames.binary_search(&frame).is_ok()
    }

    /// Session-local index of a global frame.
    pub fn local_index(&self, frame: FrameIndex) -> Option<usize> {
        self.frames.binary_search(&frame).ok()
    }

    /// Global frame of a session-local index.
    pub fn global_index(&self, local: usize) -> Option<FrameIndex> {
        self.frames.get(local).copied()
    }

    pub fn frame_names(&self) -> Vec<String> {
        self.frames.iter().map(|f| frame_file_name(*f)).collect()
    }

    pub fn frame_path(&self, frame: FrameIndex) -> PathBuf {
        self.dir.join(frame_file_name(frame))
    }
}

/// Frames a chunk needs: the stride inside each sub-run plus marker frames.
///
/// The stride is anchored at each sub-run's first frame.
pub fn plan_chunk_frames(chunk: &Chunk, every_n_frame: u64, markers: &[Marker]) -> BTreeSet<FrameIndex> {
    let step = every_n_frame.max(1) as usize;
    let mut frames = BTreeSet::new();

    for sub in &chunk.sub_runs {
        frames.extend((sub.start_frame..=sub.end_frame).step_by(step));
    }
    frames.extend(
        markers
            .iter()
            .map(|m| m.frame_idx)
            .filter(|f| chunk.contains(*f)),
    );
    frames
}

/// Stage a chunk's frames from `frames_dir` into `<chunk_dir>/frames`.
///
/// Frames already present are left alone. A frame missing from
/// `frames_dir` is an input error.
pub async fn materialize_chunk(
    frames_dir: impl AsRef<Path>,
    chunk_dir: impl AsRef<Path>,
    chunk: &Chunk,
    every_n_frame: u64,
    markers: &[Marker],
) -> MediaResult<FrameSet> {
    let frames_dir = frames_dir.as_ref();
    let target = chunk_dir.as_ref().join("frames");
    tokio::fs::create_dir_all(&target).await?;

    let planned = plan_chunk_frames(chunk, every_n_frame, markers);
    let mut staged = 0usize;

    for &frame in &planned {
        let name = frame_file_name(frame);
        let dst = target.join(&name);
        if tokio::fs::try_exists(&dst).await? {
            continue;
        }
        let src = frames_dir.join(&name);
        if !tokio::fs::try_exists(&src).await? {
            return Err(MediaError::FrameNotFound { frame, path: src });
        }
        link_or_copy(&src, &dst).await?;
        staged += 1;
    }

    debug!(
        chunk = chunk.index,
        frames = planned.len(),
        staged,
        dir = %target.display(),
        "Materialized chunk frames"
    );

    Ok(FrameSet::new(target, planned))
}

//! Chunk result merging.
//!
//! Each chunk directory holds `masks/{object}/{frame}.json` and
//! `boxes/{object}/{frame}.json`. Merging links every artifact into
//! `results/{masks|boxes}/{object}/` under its original file name. Two
//! chunks producing the same `(object, frame)` artifact means the partition
//! overlapped and is reported, never resolved.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use sqp_models::{FrameIndex, Marker, ObjectFrames, ObjectId, SegmentationSummary};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::link_artifact;

/// Name of the merged results directory under the segmentation directory.
pub const RESULTS_DIR: &str = "results";

/// Per-frame artifact type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Masks,
    Boxes,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Masks, ArtifactKind::Boxes];

    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Masks => "masks",
            ArtifactKind::Boxes => "boxes",
        }
    }
}

/// File name of a per-frame artifact.
pub fn artifact_file_name(frame: FrameIndex) -> String {
    format!("{:06}.json", frame)
}

/// `<root>/<kind>/<object>/<frame>.json`
pub fn artifact_path(root: impl AsRef<Path>, kind: ArtifactKind, object_id: &ObjectId, frame: FrameIndex) -> PathBuf {
    root.as_ref()
        .join(kind.dir_name())
        .join(object_id.as_str())
        .join(artifact_file_name(frame))
}

fn parse_frame(name: &str) -> Option<FrameIndex> {
    name.strip_suffix(".json")?.parse().ok()
}

fn parse_chunk_index(name: &str) -> Option<usize> {
    name.strip_prefix("chunk_")?.parse().ok()
}

/// Outcome of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Sorted frames with a mask, per object
    pub objects: BTreeMap<ObjectId, Vec<FrameIndex>>,
    /// Links created across all artifact kinds
    pub linked: usize,
    pub chunks: usize,
}

impl MergeReport {
    /// Summary persisted next to the merged results.
    pub fn into_summary(self, markers: Vec<Marker>) -> SegmentationSummary {
        SegmentationSummary {
            markers,
            objects: self
                .objects
                .into_iter()
                .map(|(id, frames)| (id, ObjectFrames { frames }))
                .collect(),
            failed_chunks: Vec::new(),
        }
    }
}

/// Chunk directories under `segmentation_dir`, in chunk order.
pub async fn list_chunk_dirs(segmentation_dir: impl AsRef<Path>) -> MediaResult<Vec<(usize, PathBuf)>> {
    let mut chunks = Vec::new();
    let mut entries = fs::read_dir(segmentation_dir.as_ref()).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(index) = entry.file_name().to_str().and_then(parse_chunk_index) {
            chunks.push((index, entry.path()));
        }
    }
    chunks.sort_by_key(|(index, _)| *index);
    Ok(chunks)
}

struct DirEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

async fn sorted_entries(dir: &Path) -> MediaResult<Vec<DirEntry>> {
    let mut out = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_str().map(str::to_string).ok_or_else(|| {
            MediaError::consistency(format!("non UTF-8 entry in {}", dir.display()))
        })?;
        out.push(DirEntry {
            name,
            path: entry.path(),
            is_dir: entry.file_type().await?.is_dir(),
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Link every chunk's artifacts into `<segmentation_dir>/results`.
///
/// The results directory is rebuilt from scratch on every call. Anything
/// under a chunk's `masks/` or `boxes/` that is not an
/// `{object}/{frame}.json` file fails the merge.
pub async fn merge_chunk_results(segmentation_dir: impl AsRef<Path>) -> MediaResult<MergeReport> {
    let segmentation_dir = segmentation_dir.as_ref();
    let results = segmentation_dir.join(RESULTS_DIR);
    if fs::try_exists(&results).await? {
        fs::remove_dir_all(&results).await?;
    }
    fs::create_dir_all(&results).await?;

    let chunks = list_chunk_dirs(segmentation_dir).await?;
    let mut report = MergeReport {
        chunks: chunks.len(),
        ..Default::default()
    };
    let mut mask_frames: BTreeMap<ObjectId, BTreeSet<FrameIndex>> = BTreeMap::new();
    // (kind, object, frame) -> contributing chunk
    let mut owners: BTreeMap<(ArtifactKind, ObjectId, FrameIndex), usize> = BTreeMap::new();

    for (chunk_index, chunk_dir) in &chunks {
        let mut linked_here = 0usize;

        for kind in ArtifactKind::ALL {
            for object_entry in sorted_entries(&chunk_dir.join(kind.dir_name())).await? {
                let object_id = ObjectId::new(object_entry.name);
                if !object_entry.is_dir || !object_id.is_path_safe() {
                    return Err(MediaError::consistency(format!(
                        "unexpected entry {} in chunk {}",
                        object_entry.path.display(),
                        chunk_index
                    )));
                }

                for frame_entry in sorted_entries(&object_entry.path).await? {
                    let frame = parse_frame(&frame_entry.name)
                        .filter(|_| !frame_entry.is_dir)
                        .ok_or_else(|| {
                            MediaError::consistency(format!(
                                "unexpected entry {} for object {} in chunk {}",
                                frame_entry.path.display(),
                                object_id,
                                chunk_index
                            ))
                        })?;
                    let src = frame_entry.path;

                    let key = (kind, object_id.clone(), frame);
                    if let Some(previous) = owners.get(&key) {
                        return Err(MediaError::consistency(format!(
                            "chunks {} and {} both produced {} for object {} at frame {}",
                            previous,
                            chunk_index,
                            kind.dir_name(),
                            object_id,
                            frame
                        )));
                    }

                    link_artifact(&src, artifact_path(&results, kind, &object_id, frame)).await?;
                    owners.insert(key, *chunk_index);
                    if kind == ArtifactKind::Masks {
                        mask_frames.entry(object_id.clone()).or_default().insert(frame);
                    }
                    linked_here += 1;
                }
            }
        }

        debug!(chunk = chunk_index, linked = linked_here, "Merged chunk artifacts");
        report.linked += linked_here;
    }

    report.objects = mask_frames
        .into_iter()
        .map(|(id, frames)| (id, frames.into_iter().collect()))
        .collect();

    info!(
        chunks = report.chunks,
        objects = report.objects.len(),
        linked = report.linked,
        "Chunk results merged"
    );
    Ok(report)
}

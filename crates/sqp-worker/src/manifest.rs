//! Batch manifest listing the videos to process.
//!
//! ```json
//! {"jobs": [{"video_path": "final.mp4", "markers_path": "final.markers.json"}]}
//! ```
//!
//! Relative paths resolve against the manifest's directory. A markers file
//! is a JSON array of markers.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sqp_media::fs_utils::read_json;
use sqp_media::MediaError;
use sqp_models::{Marker, VideoId};

use crate::error::{WorkerError, WorkerResult};
use crate::processor::VideoJob;

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub video_path: PathBuf,
    #[serde(default)]
    pub markers_path: Option<PathBuf>,
    /// Working directory name; the video file stem when absent
    #[serde(default)]
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub jobs: Vec<ManifestEntry>,
}

impl Manifest {
    /// Load a manifest and resolve its relative paths.
    pub async fn load(path: impl AsRef<Path>) -> WorkerResult<Self> {
        let path = path.as_ref();
        let mut manifest: Manifest = read_json(path).await.map_err(|e| match e {
            MediaError::JsonParse(e) => {
                WorkerError::invalid_manifest(format!("{}: {}", path.display(), e))
            }
            other => other.into(),
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for entry in &mut manifest.jobs {
            entry.video_path = resolve(base, &entry.video_path);
            if let Some(markers) = entry.markers_path.as_mut() {
                *markers = resolve(base, markers);
            }
        }
        Ok(manifest)
    }

    /// Read every entry's markers and build the jobs.
    ///
    /// Two entries resolving to the same video id would share a working
    /// directory and are rejected.
    pub async fn into_jobs(self) -> WorkerResult<Vec<VideoJob>> {
        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(self.jobs.len());

        for entry in self.jobs {
            let job = entry.into_job().await?;
            if !seen.insert(job.video_id.clone()) {
                return Err(WorkerError::invalid_manifest(format!(
                    "duplicate video id '{}'",
                    job.video_id
                )));
            }
            jobs.push(job);
        }
        Ok(jobs)
    }
}

impl ManifestEntry {
    pub fn resolved_video_id(&self) -> VideoId {
        match &self.video_id {
            Some(id) => VideoId::from_string(id.clone()),
            None => self
                .video_path
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .map(VideoId::from_string)
                .unwrap_or_default(),
        }
    }

    pub async fn into_job(self) -> WorkerResult<VideoJob> {
        let markers: Vec<Marker> = match &self.markers_path {
            Some(path) => read_json(path).await.map_err(|e| match e {
                MediaError::JsonParse(e) => {
                    WorkerError::invalid_manifest(format!("markers {}: {}", path.display(), e))
                }
                other => other.into(),
            })?,
            None => Vec::new(),
        };

        Ok(VideoJob {
            video_id: self.resolved_video_id(),
            video_path: self.video_path,
            markers,
        })
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqp_models::{ObjectId, Point};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let markers = vec![Marker::positive(12, "player1", vec![Point::new(100.0, 200.0)])];
        tokio::fs::write(
            dir.path().join("final.markers.json"),
            serde_json::to_vec(&markers).unwrap(),
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("batch.json"),
            r#"{"jobs": [
                {"video_path": "final.mp4", "markers_path": "final.markers.json"},
                {"video_path": "/videos/semi.mp4", "video_id": "semi-2"}
            ]}"#,
        )
        .await
        .unwrap();

        let manifest = Manifest::load(dir.path().join("batch.json")).await.unwrap();
        assert_eq!(manifest.jobs[0].video_path, dir.path().join("final.mp4"));
        assert_eq!(manifest.jobs[1].video_path, PathBuf::from("/videos/semi.mp4"));

        let jobs = manifest.into_jobs().await.unwrap();
        assert_eq!(jobs[0].video_id.as_str(), "final");
        assert_eq!(jobs[0].markers[0].object_id, ObjectId::from("player1"));
        assert_eq!(jobs[1].video_id.as_str(), "semi-2");
        assert!(jobs[1].markers.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_video_ids_rejected() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join("batch.json"),
            r#"{"jobs": [{"video_path": "a/match.mp4"}, {"video_path": "b/match.mp4"}]}"#,
        )
        .await
        .unwrap();

        let err = Manifest::load(dir.path().join("batch.json"))
            .await
            .unwrap()
            .into_jobs()
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidManifest(_)));
    }

    #[tokio::test]
    async fn test_malformed_manifest() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("batch.json"), b"{jobs: }").await.unwrap();

        let err = Manifest::load(dir.path().join("batch.json")).await.unwrap_err();
        assert!(err.is_input_error());
    }
}

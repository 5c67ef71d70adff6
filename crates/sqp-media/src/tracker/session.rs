//! Per-chunk tracking session state machine.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use sqp_models::{BoxPrompt, FrameIndex, Marker, ObjectId, Point, RleMask};

use super::{
    ObjectPrompt, OffloadPolicy, PointSpace, PromptableSegmenter, PropagateRequest,
    PropagatedFrame, PropagationDirection, SessionHandle,
};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::write_json;
use crate::mask::rle_bbox;
use crate::materialize::FrameSet;
use crate::merge::{artifact_path, ArtifactKind};

/// Lifecycle of a [`TrackingSession`].
///
/// `Uninitialized` has no value: a session only exists once its backend
/// state is allocated, and [`TrackingSession::release`] consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    Annotated,
    Propagated,
    Released,
}

type FrameMasks = BTreeMap<ObjectId, RleMask>;

/// Tracking session scoped to one chunk's materialized frames.
pub struct TrackingSession {
    backend: Arc<dyn PromptableSegmenter>,
    handle: SessionHandle,
    frames: FrameSet,
    height: u32,
    width: u32,
    state: SessionState,
    max_frames: Option<usize>,
    prompts: BTreeMap<(FrameIndex, ObjectId), Marker>,
    masks: BTreeMap<FrameIndex, FrameMasks>,
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("backend", &self.backend.name())
            .field("handle", &self.handle)
            .field("frames", &self.frames.len())
            .field("state", &self.state)
            .finish()
    }
}

impl TrackingSession {
    /// Allocate backend state over `frames`.
    ///
    /// Any backend failure surfaces as [`MediaError::SessionInit`].
    pub async fn init(
        backend: Arc<dyn PromptableSegmenter>,
        frames: FrameSet,
        offload: OffloadPolicy,
    ) -> MediaResult<Self> {
        if frames.is_empty() {
            return Err(MediaError::session_init(format!(
                "no frames staged in {}",
                frames.dir().display()
            )));
        }

        let info = backend
            .init_state(&frames, offload)
            .await
            .map_err(|e| match e {
                MediaError::SessionInit(_) => e,
                other => MediaError::session_init(format!(
                    "{} backend could not open {}: {}",
                    backend.name(),
                    frames.dir().display(),
                    other
                )),
            })?;

        info!(
            backend = backend.name(),
            session = %info.handle,
            frames = frames.len(),
            width = info.width,
            height = info.height,
            "Tracking session initialized"
        );

        Ok(Self {
            backend,
            handle: info.handle,
            frames,
            height: info.height,
            width: info.width,
            state: SessionState::Initialized,
            max_frames: None,
            prompts: BTreeMap::new(),
            masks: BTreeMap::new(),
        })
    }

    /// Cap the frames each propagation sweep may visit.
    pub fn with_max_frames(mut self, max_frames: Option<usize>) -> Self {
        self.max_frames = max_frames.filter(|n| *n > 0);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn frames(&self) -> &FrameSet {
        &self.frames
    }

    /// `(height, width)` of every frame in the session.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    /// Objects with at least one prompt.
    pub fn objects(&self) -> BTreeSet<ObjectId> {
        self.prompts.keys().map(|(_, id)| id.clone()).collect()
    }

    /// Masks keyed by global frame index.
    pub fn masks(&self) -> &BTreeMap<FrameIndex, BTreeMap<ObjectId, RleMask>> {
        &self.masks
    }

    pub fn mask(&self, frame: FrameIndex, object_id: &ObjectId) -> Option<&RleMask> {
        self.masks.get(&frame).and_then(|m| m.get(object_id))
    }

    /// Register `marker` and return the object's mask at its frame.
    ///
    /// A second marker for the same frame and object replaces the first.
    /// Annotating after propagation discards the propagated masks.
    pub async fn add_annotation(&mut self, marker: &Marker) -> MediaResult<RleMask> {
        marker.validate()?;

        let local = self.frames.local_index(marker.frame_idx).ok_or_else(|| {
            MediaError::invalid_marker(format!(
                "frame {} is not materialized in {}",
                marker.frame_idx,
                self.frames.dir().display()
            ))
        })?;

        if self.state == SessionState::Propagated {
            self.masks.clear();
        }

        let key = (marker.frame_idx, marker.object_id.clone());
        if self.prompts.contains_key(&key) {
            debug!(
                frame = marker.frame_idx,
                object = %marker.object_id,
                "Replacing existing prompt"
            );
            self.backend
                .clear_prompts(&self.handle, local, &marker.object_id)
                .await?;
        }

        let prompt = self.to_backend_prompt(marker, local);
        let mask = self.backend.add_prompt(&self.handle, &prompt).await?;
        self.check_mask_size(&mask, &marker.object_id)?;

        self.prompts.insert(key, marker.clone());
        self.masks
            .entry(marker.frame_idx)
            .or_default()
            .insert(marker.object_id.clone(), mask.clone());
        self.state = SessionState::Annotated;

        Ok(mask)
    }

    fn to_backend_prompt(&self, marker: &Marker, local: usize) -> ObjectPrompt {
        let (points, labels) = marker.labelled_points();
        let (sx, sy) = match self.backend.point_space() {
            PointSpace::Pixel => (1.0, 1.0),
            PointSpace::Normalized => (self.width as f64, self.height as f64),
        };
        ObjectPrompt {
            frame_idx: local,
            object_id: marker.object_id.clone(),
            points: points
                .into_iter()
                .map(|p| Point::new(p.x / sx, p.y / sy))
                .collect(),
            labels,
            box_prompt: marker.box_prompt.map(|b| {
                BoxPrompt::new(b.x_min / sx, b.y_min / sy, b.x_max / sx, b.y_max / sy)
            }),
        }
    }

    fn check_mask_size(&self, mask: &RleMask, object_id: &ObjectId) -> MediaResult<()> {
        if mask.size != [self.height, self.width] {
            return Err(MediaError::consistency(format!(
                "backend returned a {:?} mask for object {} in a {}x{} session",
                mask.size, object_id, self.height, self.width
            )));
        }
        Ok(())
    }

    fn annotated_range(&self) -> MediaResult<(usize, usize)> {
        let first = self.prompts.keys().map(|(f, _)| *f).min();
        let last = self.prompts.keys().map(|(f, _)| *f).max();
        match (first, last) {
            (Some(first), Some(last)) => {
                let to_local = |f| {
                    self.frames.local_index(f).ok_or_else(|| {
                        MediaError::consistency(format!("annotated frame {} left the frame set", f))
                    })
                };
                Ok((to_local(first)?, to_local(last)?))
            }
            _ => Err(MediaError::invalid_state("propagate called before any annotation")),
        }
    }

    /// Backward sweep from the last annotated frame, then forward sweep from
    /// the first.
    ///
    /// Where both sweeps produce a mask for the same frame and object the
    /// forward mask wins. Every covered frame gets an entry for every
    /// tracked object, empty when neither sweep reached it. Without a frame
    /// cap every frame of the chunk is covered.
    pub async fn propagate(&mut self) -> MediaResult<&BTreeMap<FrameIndex, BTreeMap<ObjectId, RleMask>>> {
        self.annotated_range()?;
        self.masks.clear();

        let backward = self.propagate_sweep(PropagationDirection::Backward).await?;
        let forward = self.propagate_sweep(PropagationDirection::Forward).await?;

        info!(
            session = %self.handle,
            objects = self.objects().len(),
            backward,
            forward,
            frames = self.masks.len(),
            "Propagation finished"
        );

        Ok(&self.masks)
    }

    /// Run a single sweep, merging its masks over any existing ones.
    ///
    /// Returns the number of frames the sweep visited.
    pub async fn propagate_sweep(&mut self, direction: PropagationDirection) -> MediaResult<usize> {
        let (first, last) = self.annotated_range()?;
        let start_frame_idx = match direction {
            PropagationDirection::Forward => first,
            PropagationDirection::Backward => last,
        };

        let request = PropagateRequest {
            start_frame_idx,
            direction,
            max_frames: self.max_frames,
        };
        let frames = self.backend.propagate(&self.handle, request).await?;
        let visited = frames.len();
        self.merge_sweep(frames)?;

        if self.max_frames.is_none() {
            self.fill_all_frames();
        }
        self.state = SessionState::Propagated;

        debug!(
            session = %self.handle,
            direction = ?direction,
            start = start_frame_idx,
            visited,
            "Propagation sweep merged"
        );
        Ok(visited)
    }

    fn merge_sweep(&mut self, frames: Vec<PropagatedFrame>) -> MediaResult<()> {
        let tracked = self.objects();

        for frame in frames {
            let global = self.frames.global_index(frame.frame_idx).ok_or_else(|| {
                MediaError::consistency(format!(
                    "backend returned frame {} outside a {}-frame session",
                    frame.frame_idx,
                    self.frames.len()
                ))
            })?;

            for (object_id, mask) in &frame.masks {
                if !tracked.contains(object_id) {
                    return Err(MediaError::consistency(format!(
                        "backend returned unknown object id {} at frame {}",
                        object_id, global
                    )));
                }
                self.check_mask_size(mask, object_id)?;
            }

            let entry = self.masks.entry(global).or_default();
            entry.extend(frame.masks);
            for object_id in &tracked {
                entry
                    .entry(object_id.clone())
                    .or_insert_with(|| RleMask::empty(self.height, self.width));
            }
        }
        Ok(())
    }

    fn fill_all_frames(&mut self) {
        let tracked = self.objects();
        for &frame in self.frames.frames() {
            let entry = self.masks.entry(frame).or_default();
            for object_id in &tracked {
                entry
                    .entry(object_id.clone())
                    .or_insert_with(|| RleMask::empty(self.height, self.width));
            }
        }
    }

    /// Clear prompts and masks without reallocating the session.
    pub async fn reset(&mut self) -> MediaResult<()> {
        self.backend.reset_state(&self.handle).await?;
        self.prompts.clear();
        self.masks.clear();
        self.state = SessionState::Initialized;
        debug!(session = %self.handle, "Tracking session reset");
        Ok(())
    }

    /// Write every mask and its box under `chunk_dir`, named by global frame.
    ///
    /// Returns the number of (frame, object) artifacts written.
    pub async fn persist(&self, chunk_dir: impl AsRef<Path>) -> MediaResult<usize> {
        let chunk_dir = chunk_dir.as_ref();
        let mut written = 0usize;

        for (&frame, objects) in &self.masks {
            for (object_id, mask) in objects {
                let bbox = rle_bbox(mask)?;
                write_json(artifact_path(chunk_dir, ArtifactKind::Masks, object_id, frame), mask).await?;
                write_json(artifact_path(chunk_dir, ArtifactKind::Boxes, object_id, frame), &bbox).await?;
                written += 1;
            }
        }

        debug!(
            session = %self.handle,
            dir = %chunk_dir.display(),
            written,
            "Persisted chunk artifacts"
        );
        Ok(written)
    }

    /// Free backend resources.
    pub async fn release(mut self) -> MediaResult<()> {
        let result = self.backend.release(&self.handle).await;
        self.state = SessionState::Released;
        self.masks.clear();
        result
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        if self.state != SessionState::Released {
            warn!(
                backend = self.backend.name(),
                session = %self.handle,
                "Tracking session dropped without release"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{decode_rle, rle_is_empty};
    use crate::tracker::PromptGeometrySegmenter;
    use crate::tracker::{PropagatedFrame, SessionInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn write_frames(dir: &Path, frames: impl IntoIterator<Item = u64>) -> FrameSet {
        std::fs::create_dir_all(dir).unwrap();
        let frames: Vec<u64> = frames.into_iter().collect();
        for f in &frames {
            image::GrayImage::new(64, 48)
                .save(dir.join(crate::materialize::frame_file_name(*f)))
                .unwrap();
        }
        FrameSet::new(dir, frames)
    }

    fn geometry() -> Arc<dyn PromptableSegmenter> {
        Arc::new(PromptGeometrySegmenter::new(6.0))
    }

    #[tokio::test]
    async fn test_forward_propagation_covers_every_frame() {
        let dir = TempDir::new().unwrap();
        let frames = write_frames(dir.path(), 0..=100);
        let mut session = TrackingSession::init(geometry(), frames, OffloadPolicy::default())
            .await
            .unwrap()
            .with_max_frames(Some(41));

        let marker = Marker::positive(10, "1", vec![Point::new(20.0, 20.0)]);
        let mask = session.add_annotation(&marker).await.unwrap();
        assert!(!rle_is_empty(&mask).unwrap());
        assert_eq!(session.state(), SessionState::Annotated);

        session.propagate().await.unwrap();
        assert_eq!(session.state(), SessionState::Propagated);

        let id = ObjectId::from("1");
        for frame in 10..=50 {
            let mask = session.mask(frame, &id).expect("mask for frame");
            assert!(!rle_is_empty(mask).unwrap(), "frame {} empty", frame);
        }
        assert!(session.mask(60, &id).is_none());

        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_two_objects_cover_every_frame() {
        let dir = TempDir::new().unwrap();
        let frames = write_frames(dir.path(), 0..20);
        let mut session = TrackingSession::init(geometry(), frames, OffloadPolicy::default())
            .await
            .unwrap();

        session
            .add_annotation(&Marker::positive(2, "1", vec![Point::new(10.0, 10.0)]))
            .await
            .unwrap();
        session
            .add_annotation(&Marker::positive(15, "2", vec![Point::new(40.0, 30.0)]))
            .await
            .unwrap();
        session.propagate().await.unwrap();

        assert_eq!(session.masks().len(), 20);
        for objects in session.masks().values() {
            assert_eq!(objects.len(), 2);
            assert!(objects.values().all(|m| !rle_is_empty(m).unwrap()));
        }

        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeat_annotation_replaces_prompt() {
        let dir = TempDir::new().unwrap();
        let frames = write_frames(dir.path(), 0..5);
        let mut session = TrackingSession::init(geometry(), frames, OffloadPolicy::default())
            .await
            .unwrap();

        let first = Marker::positive(1, "1", vec![Point::new(10.0, 10.0)]);
        let second = Marker::positive(1, "1", vec![Point::new(50.0, 40.0)]);
        session.add_annotation(&first).await.unwrap();
        let mask = session.add_annotation(&second).await.unwrap();

        let decoded = decode_rle(&mask).unwrap();
        assert!(decoded[[40, 50]]);
        assert!(!decoded[[10, 10]], "stale prompt must be cleared");
        assert_eq!(session.objects().len(), 1);

        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_marker_outside_frame_set() {
        let dir = TempDir::new().unwrap();
        let frames = write_frames(dir.path(), [0, 5, 10]);
        let mut session = TrackingSession::init(geometry(), frames, OffloadPolicy::default())
            .await
            .unwrap();

        let err = session
            .add_annotation(&Marker::positive(7, "1", vec![Point::new(1.0, 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidMarker(_)));

        let err = session.propagate().await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidState(_)));
        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_returns_to_initialized() {
        let dir = TempDir::new().unwrap();
        let frames = write_frames(dir.path(), 0..5);
        let mut session = TrackingSession::init(geometry(), frames, OffloadPolicy::default())
            .await
            .unwrap();

        session
            .add_annotation(&Marker::positive(0, "1", vec![Point::new(5.0, 5.0)]))
            .await
            .unwrap();
        session.propagate().await.unwrap();
        session.reset().await.unwrap();

        assert_eq!(session.state(), SessionState::Initialized);
        assert!(session.masks().is_empty());
        assert!(session.objects().is_empty());

        // Same session can be annotated again
        session
            .add_annotation(&Marker::positive(3, "2", vec![Point::new(5.0, 5.0)]))
            .await
            .unwrap();
        session.propagate().await.unwrap();
        assert_eq!(session.masks().len(), 5);
        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_frames_fail_init() {
        let dir = TempDir::new().unwrap();
        let frames = FrameSet::new(dir.path(), [0, 5]);
        let err = TrackingSession::init(geometry(), frames, OffloadPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::SessionInit(_)));

        let empty = FrameSet::new(dir.path(), Vec::<u64>::new());
        let err = TrackingSession::init(geometry(), empty, OffloadPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::SessionInit(_)));
    }

    #[tokio::test]
    async fn test_persist_writes_masks_and_boxes() {
        let dir = TempDir::new().unwrap();
        let frames = write_frames(&dir.path().join("frames"), 0..3);
        let mut session = TrackingSession::init(geometry(), frames, OffloadPolicy::default())
            .await
            .unwrap();
        session
            .add_annotation(&Marker::positive(1, "p1", vec![Point::new(30.0, 20.0)]))
            .await
            .unwrap();
        session.propagate().await.unwrap();

        let written = session.persist(dir.path()).await.unwrap();
        assert_eq!(written, 3);
        let bbox: sqp_models::BBox = crate::fs_utils::read_json(
            dir.path().join("boxes").join("p1").join("000001.json"),
        )
        .await
        .unwrap();
        assert!(!bbox.is_empty());
        assert!(dir.path().join("masks/p1/000002.json").exists());
        session.release().await.unwrap();
    }

    /// Backend that records prompts and returns a canned sweep.
    struct ScriptedBackend {
        prompts: Mutex<Vec<ObjectPrompt>>,
        sweep: Vec<PropagatedFrame>,
    }

    #[async_trait]
    impl PromptableSegmenter for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn point_space(&self) -> PointSpace {
            PointSpace::Normalized
        }

        async fn init_state(&self, _frames: &FrameSet, _offload: OffloadPolicy) -> MediaResult<SessionInfo> {
            Ok(SessionInfo {
                handle: SessionHandle("s".into()),
                height: 10,
                width: 20,
            })
        }

        async fn add_prompt(&self, _session: &SessionHandle, prompt: &ObjectPrompt) -> MediaResult<RleMask> {
            self.prompts.lock().unwrap().push(prompt.clone());
            Ok(RleMask::empty(10, 20))
        }

        async fn clear_prompts(&self, _: &SessionHandle, _: usize, _: &ObjectId) -> MediaResult<()> {
            Ok(())
        }

        async fn propagate(&self, _: &SessionHandle, _: PropagateRequest) -> MediaResult<Vec<PropagatedFrame>> {
            Ok(self.sweep.clone())
        }

        async fn reset_state(&self, _: &SessionHandle) -> MediaResult<()> {
            Ok(())
        }

        async fn release(&self, _: &SessionHandle) -> MediaResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_normalized_prompts_keep_marker_coordinates() {
        let backend = Arc::new(ScriptedBackend {
            prompts: Mutex::new(Vec::new()),
            sweep: Vec::new(),
        });
        let mut session = TrackingSession::init(
            backend.clone(),
            FrameSet::new("/unused", [4, 8]),
            OffloadPolicy::default(),
        )
        .await
        .unwrap();

        let marker = Marker::positive(8, "1", vec![Point::new(10.0, 5.0)])
            .with_box(BoxPrompt::new(0.0, 0.0, 20.0, 10.0));
        session.add_annotation(&marker).await.unwrap();

        let sent = backend.prompts.lock().unwrap()[0].clone();
        assert_eq!(sent.frame_idx, 1);
        assert_eq!(sent.points[0], Point::new(0.5, 0.5));
        assert_eq!(sent.box_prompt, Some(BoxPrompt::new(0.0, 0.0, 1.0, 1.0)));
        assert_eq!(marker.positive_points[0], Point::new(10.0, 5.0));
        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_uncovered_frames_get_empty_masks() {
        let mut masks = BTreeMap::new();
        masks.insert(ObjectId::from("1"), RleMask::empty(10, 20));
        let backend = Arc::new(ScriptedBackend {
            prompts: Mutex::new(Vec::new()),
            sweep: vec![PropagatedFrame { frame_idx: 0, masks }],
        });
        let mut session = TrackingSession::init(backend, FrameSet::new("/unused", [0, 1, 2]), OffloadPolicy::default())
            .await
            .unwrap();
        session
            .add_annotation(&Marker::positive(0, "1", vec![Point::new(1.0, 1.0)]))
            .await
            .unwrap();
        session.propagate().await.unwrap();

        let id = ObjectId::from("1");
        for frame in 0..3 {
            assert_eq!(session.mask(frame, &id), Some(&RleMask::empty(10, 20)));
        }
        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_object_from_backend_is_consistency_error() {
        let mut masks = BTreeMap::new();
        masks.insert(ObjectId::from("ghost"), RleMask::empty(10, 20));
        let backend = Arc::new(ScriptedBackend {
            prompts: Mutex::new(Vec::new()),
            sweep: vec![PropagatedFrame { frame_idx: 0, masks }],
        });
        let mut session = TrackingSession::init(backend, FrameSet::new("/unused", [0, 1]), OffloadPolicy::default())
            .await
            .unwrap();
        session
            .add_annotation(&Marker::positive(0, "1", vec![Point::new(1.0, 1.0)]))
            .await
            .unwrap();

        let err = session.propagate().await.unwrap_err();
        assert!(err.is_consistency_error());
        session.release().await.unwrap();
    }
}

//! Deterministic in-process segmentation backend.
//!
//! Prompts are rasterized directly: the box plus a disc around every
//! positive point, minus a disc around every negative point. Propagation
//! holds an object's mask from its nearest prompt in the sweep direction.
//! Used for dry runs and tests when no model service is configured.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use sqp_models::{ObjectId, Point, RleMask};

use super::{
    ObjectPrompt, OffloadPolicy, PromptableSegmenter, PropagateRequest, PropagatedFrame,
    PropagationDirection, SessionHandle, SessionInfo,
};
use crate::error::{MediaError, MediaResult};
use crate::mask::{encode_rle, BinaryMask};
use crate::materialize::FrameSet;

/// Disc radius in pixels used when none is configured.
pub const DEFAULT_RADIUS: f64 = 12.0;

#[derive(Debug)]
struct GeometrySession {
    frames: usize,
    height: u32,
    width: u32,
    /// object -> local frame -> accumulated prompts
    prompts: BTreeMap<ObjectId, BTreeMap<usize, Vec<ObjectPrompt>>>,
}

impl GeometrySession {
    fn rasterize(&self, prompts: &[ObjectPrompt], radius: f64) -> RleMask {
        let (h, w) = (self.height as usize, self.width as usize);
        let mut mask = BinaryMask::from_elem((h, w), false);

        let mut negatives: Vec<Point> = Vec::new();
        for prompt in prompts {
            if let Some(b) = prompt.box_prompt {
                let x0 = b.x_min.max(0.0) as usize;
                let y0 = b.y_min.max(0.0) as usize;
                let x1 = (b.x_max as usize).min(w.saturating_sub(1));
                let y1 = (b.y_max as usize).min(h.saturating_sub(1));
                for row in y0..=y1 {
                    for col in x0..=x1 {
                        mask[[row, col]] = true;
                    }
                }
            }
            for (point, label) in prompt.points.iter().zip(&prompt.labels) {
                if *label == 1 {
                    paint_disc(&mut mask, point, radius, true);
                } else {
                    negatives.push(*point);
                }
            }
        }
        for point in &negatives {
            paint_disc(&mut mask, point, radius, false);
        }

        encode_rle(&mask)
    }
}

fn paint_disc(mask: &mut BinaryMask, center: &Point, radius: f64, value: bool) {
    let (h, w) = mask.dim();
    let r2 = radius * radius;
    let row0 = (center.y - radius).floor().max(0.0) as usize;
    let col0 = (center.x - radius).floor().max(0.0) as usize;
    let row1 = ((center.y + radius).ceil() as usize).min(h.saturating_sub(1));
    let col1 = ((center.x + radius).ceil() as usize).min(w.saturating_sub(1));

    for row in row0..=row1 {
        for col in col0..=col1 {
            let dy = row as f64 - center.y;
            let dx = col as f64 - center.x;
            if dx * dx + dy * dy <= r2 {
                mask[[row, col]] = value;
            }
        }
    }
}

/// Rasterizing backend that holds masks between prompts.
#[derive(Debug)]
pub struct PromptGeometrySegmenter {
    radius: f64,
    sessions: Mutex<HashMap<SessionHandle, GeometrySession>>,
}

impl Default for PromptGeometrySegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_RADIUS)
    }
}

impl PromptGeometrySegmenter {
    pub fn new(radius: f64) -> Self {
        Self {
            radius: radius.max(0.5),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn with_session<T>(
        &self,
        handle: &SessionHandle,
        f: impl FnOnce(&mut GeometrySession) -> MediaResult<T>,
    ) -> MediaResult<T> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| MediaError::internal("geometry session table poisoned"))?;
        let session = sessions
            .get_mut(handle)
            .ok_or_else(|| MediaError::backend(format!("unknown session {}", handle)))?;
        f(session)
    }

    /// Number of live sessions.
    pub fn live_sessions(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PromptableSegmenter for PromptGeometrySegmenter {
    fn name(&self) -> &'static str {
        "geometry"
    }

    async fn init_state(&self, frames: &FrameSet, offload: OffloadPolicy) -> MediaResult<SessionInfo> {
        let first = frames
            .frames()
            .first()
            .copied()
            .ok_or_else(|| MediaError::session_init("empty frame set"))?;

        for &frame in frames.frames() {
            let path = frames.frame_path(frame);
            if !tokio::fs::try_exists(&path).await? {
                return Err(MediaError::FrameNotFound { frame, path });
            }
        }

        let (width, height) = image::image_dimensions(frames.frame_path(first))?;
        let handle = SessionHandle(Uuid::new_v4().to_string());

        debug!(
            session = %handle,
            frames = frames.len(),
            offload_video = offload.offload_video_to_cpu,
            offload_state = offload.offload_state_to_cpu,
            "Geometry session allocated"
        );

        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| MediaError::internal("geometry session table poisoned"))?;
        sessions.insert(
            handle.clone(),
            GeometrySession {
                frames: frames.len(),
                height,
                width,
                prompts: BTreeMap::new(),
            },
        );

        Ok(SessionInfo {
            handle,
            height,
            width,
        })
    }

    async fn add_prompt(&self, session: &SessionHandle, prompt: &ObjectPrompt) -> MediaResult<RleMask> {
        let radius = self.radius;
        self.with_session(session, |s| {
            if prompt.frame_idx >= s.frames {
                return Err(MediaError::backend(format!(
                    "prompt frame {} outside a {}-frame session",
                    prompt.frame_idx, s.frames
                )));
            }
            let stack = s
                .prompts
                .entry(prompt.object_id.clone())
                .or_default()
                .entry(prompt.frame_idx)
                .or_default();
            stack.push(prompt.clone());
            let stack = stack.clone();
            Ok(s.rasterize(&stack, radius))
        })
    }

    async fn clear_prompts(
        &self,
        session: &SessionHandle,
        frame_idx: usize,
        object_id: &ObjectId,
    ) -> MediaResult<()> {
        self.with_session(session, |s| {
            if let Some(frames) = s.prompts.get_mut(object_id) {
                frames.remove(&frame_idx);
                if frames.is_empty() {
                    s.prompts.remove(object_id);
                }
            }
            Ok(())
        })
    }

    async fn propagate(
        &self,
        session: &SessionHandle,
        request: PropagateRequest,
    ) -> MediaResult<Vec<PropagatedFrame>> {
        let radius = self.radius;
        self.with_session(session, |s| {
            if request.start_frame_idx >= s.frames {
                return Err(MediaError::backend(format!(
                    "start frame {} outside a {}-frame session",
                    request.start_frame_idx, s.frames
                )));
            }
            let limit = request.max_frames.unwrap_or(s.frames).max(1);
            let visit: Vec<usize> = match request.direction {
                PropagationDirection::Forward => {
                    (request.start_frame_idx..s.frames).take(limit).collect()
                }
                PropagationDirection::Backward => {
                    (0..=request.start_frame_idx).rev().take(limit).collect()
                }
            };

            let mut out = Vec::with_capacity(visit.len());
            for frame_idx in visit {
                let mut masks = BTreeMap::new();
                for (object_id, prompts) in &s.prompts {
                    let source = match request.direction {
                        PropagationDirection::Forward => prompts.range(..=frame_idx).next_back(),
                        PropagationDirection::Backward => prompts.range(frame_idx..).next(),
                    };
                    if let Some((_, stack)) = source {
                        masks.insert(object_id.clone(), s.rasterize(stack, radius));
                    }
                }
                out.push(PropagatedFrame { frame_idx, masks });
            }
            Ok(out)
        })
    }

    async fn reset_state(&self, session: &SessionHandle) -> MediaResult<()> {
        self.with_session(session, |s| {
            s.prompts.clear();
            Ok(())
        })
    }

    async fn release(&self, session: &SessionHandle) -> MediaResult<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| MediaError::internal("geometry session table poisoned"))?;
        sessions
            .remove(session)
            .map(|_| ())
            .ok_or_else(|| MediaError::backend(format!("unknown session {}", session)))
    }
}

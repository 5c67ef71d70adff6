//! [`PromptableSegmenter`] backed by the remote segmentation service.

use async_trait::async_trait;
use tracing::{debug, info};

use sqp_media::error::{MediaError, MediaResult};
use sqp_media::materialize::FrameSet;
use sqp_media::tracker::{
    ObjectPrompt, OffloadPolicy, PointSpace, PromptableSegmenter, PropagateRequest, PropagatedFrame,
    SessionHandle, SessionInfo,
};
use sqp_models::{ObjectId, RleMask};

use crate::client::SegmenterClient;
use crate::error::MlResult;
use crate::types::{AddPromptRequest, ClearPromptsRequest, CreateSessionRequest, PropagateBody};

/// Remote segmentation backend.
///
/// Session state lives in the service; this type only carries the client.
pub struct RemoteSegmenter {
    client: SegmenterClient,
    point_space: PointSpace,
}

impl RemoteSegmenter {
    pub fn new(client: SegmenterClient) -> Self {
        let point_space = if client.config().normalized_points {
            PointSpace::Normalized
        } else {
            PointSpace::Pixel
        };
        Self { client, point_space }
    }

    pub fn from_env() -> MlResult<Self> {
        Ok(Self::new(SegmenterClient::from_env()?))
    }

    pub fn client(&self) -> &SegmenterClient {
        &self.client
    }
}

#[async_trait]
impl PromptableSegmenter for RemoteSegmenter {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn point_space(&self) -> PointSpace {
        self.point_space
    }

    async fn init_state(&self, frames: &FrameSet, offload: OffloadPolicy) -> MediaResult<SessionInfo> {
        let request = CreateSessionRequest {
            frames_dir: frames.dir().display().to_string(),
            frame_names: frames.frame_names(),
            offload_video_to_cpu: offload.offload_video_to_cpu,
            offload_state_to_cpu: offload.offload_state_to_cpu,
        };

        let response = self
            .client
            .create_session(&request)
            .await
            .map_err(|e| MediaError::session_init(e.to_string()))?;

        if response.height == 0 || response.width == 0 {
            return Err(MediaError::session_init(format!(
                "session {} reported empty frame size {}x{}",
                response.session_id, response.width, response.height
            )));
        }

        info!(
            session = %response.session_id,
            frames = frames.len(),
            width = response.width,
            height = response.height,
            "Remote segmentation session created"
        );

        Ok(SessionInfo {
            handle: SessionHandle(response.session_id),
            height: response.height,
            width: response.width,
        })
    }

    async fn add_prompt(&self, session: &SessionHandle, prompt: &ObjectPrompt) -> MediaResult<RleMask> {
        let request = AddPromptRequest {
            frame_idx: prompt.frame_idx,
            obj_id: prompt.object_id.clone(),
            points: prompt.points.iter().map(|p| [p.x, p.y]).collect(),
            labels: prompt.labels.clone(),
            box_prompt: prompt
                .box_prompt
                .map(|b| [b.x_min, b.y_min, b.x_max, b.y_max]),
        };

        let response = self.client.add_prompt(&session.0, &request).await?;
        if response.obj_id != prompt.object_id || response.frame_idx != prompt.frame_idx {
            return Err(MediaError::consistency(format!(
                "prompt for object {} at frame {} answered for object {} at frame {}",
                prompt.object_id, prompt.frame_idx, response.obj_id, response.frame_idx
            )));
        }
        Ok(response.mask)
    }

    async fn clear_prompts(
        &self,
        session: &SessionHandle,
        frame_idx: usize,
        object_id: &ObjectId,
    ) -> MediaResult<()> {
        let request = ClearPromptsRequest {
            frame_idx,
            obj_id: object_id.clone(),
        };
        self.client.clear_prompts(&session.0, &request).await?;
        Ok(())
    }

    async fn propagate(
        &self,
        session: &SessionHandle,
        request: PropagateRequest,
    ) -> MediaResult<Vec<PropagatedFrame>> {
        let body = PropagateBody {
            start_frame_idx: request.start_frame_idx,
            reverse: request.direction.is_reverse(),
            max_frame_num_to_track: request.max_frames,
        };

        let response = self.client.propagate(&session.0, &body).await?;
        debug!(
            session = %session,
            direction = ?request.direction,
            frames = response.frames.len(),
            "Remote propagation sweep finished"
        );

        Ok(response
            .frames
            .into_iter()
            .map(|f| PropagatedFrame {
                frame_idx: f.frame_idx,
                masks: f.masks,
            })
            .collect())
    }

    async fn reset_state(&self, session: &SessionHandle) -> MediaResult<()> {
        self.client.reset(&session.0).await?;
        Ok(())
    }

    async fn release(&self, session: &SessionHandle) -> MediaResult<()> {
        self.client.close_session(&session.0).await?;
        debug!(session = %session, "Remote segmentation session closed");
        Ok(())
    }
}

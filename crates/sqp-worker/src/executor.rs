//! Concurrent video executor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use sqp_media::progress::ProgressReporter;
use sqp_media::tracker::{PromptGeometrySegmenter, PromptableSegmenter};
use sqp_ml_client::RemoteSegmenter;
use sqp_models::{ProcessingProgress, VideoId};

use crate::config::{SegmenterBackend, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::processor::{VideoJob, VideoOutcome, VideoProcessor};

/// Builds the tracker backend handle owned by one video task.
pub trait SegmenterFactory: Send + Sync {
    fn build(&self) -> WorkerResult<Arc<dyn PromptableSegmenter>>;
}

/// Factory for the backend selected in [`WorkerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredSegmenterFactory {
    backend: SegmenterBackend,
}

impl ConfiguredSegmenterFactory {
    pub fn new(backend: SegmenterBackend) -> Self {
        Self { backend }
    }
}

impl SegmenterFactory for ConfiguredSegmenterFactory {
    fn build(&self) -> WorkerResult<Arc<dyn PromptableSegmenter>> {
        Ok(match self.backend {
            SegmenterBackend::Remote => Arc::new(RemoteSegmenter::from_env()?),
            SegmenterBackend::Geometry => Arc::new(PromptGeometrySegmenter::default()),
        })
    }
}

/// Runs videos concurrently, bounded by `max_concurrent_videos`.
pub struct VideoExecutor {
    config: Arc<WorkerConfig>,
    factory: Arc<dyn SegmenterFactory>,
    semaphore: Arc<Semaphore>,
    progress: Mutex<HashMap<VideoId, ProgressReporter>>,
}

impl VideoExecutor {
    pub fn new(config: WorkerConfig, factory: Arc<dyn SegmenterFactory>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_videos.max(1)));
        Self {
            config: Arc::new(config),
            factory,
            semaphore,
            progress: Mutex::new(HashMap::new()),
        }
    }

    /// Progress of a video that is queued or running.
    ///
    /// The entry is dropped once [`VideoExecutor::run`] collects the video's
    /// outcome; receivers taken before that keep the final snapshot.
    pub fn subscribe(&self, video_id: &VideoId) -> Option<watch::Receiver<ProcessingProgress>> {
        self.progress
            .lock()
            .ok()?
            .get(video_id)
            .map(ProgressReporter::subscribe)
    }

    /// Process every job and return the outcomes in submission order.
    ///
    /// A failing video does not stop the others.
    pub async fn run(&self, jobs: Vec<VideoJob>) -> Vec<(VideoId, WorkerResult<VideoOutcome>)> {
        info!(
            videos = jobs.len(),
            max_concurrent = self.config.max_concurrent_videos,
            "Starting video executor"
        );

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let reporter = ProgressReporter::new(job.video_id.clone());
            if let Ok(mut map) = self.progress.lock() {
                map.insert(job.video_id.clone(), reporter.clone());
            }

            let video_id = job.video_id.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let config = Arc::clone(&self.config);
            let factory = Arc::clone(&self.factory);

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| WorkerError::task_failed("Semaphore closed"))?;
                Self::execute_video(config, factory, job, reporter).await
            });
            handles.push((video_id, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (video_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(WorkerError::task_failed(format!("video task {} panicked: {}", video_id, e))),
            };
            if let Ok(mut map) = self.progress.lock() {
                map.remove(&video_id);
            }
            outcomes.push((video_id, result));
        }

        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        info!(videos = outcomes.len(), failed, "Video executor finished");
        outcomes
    }

    async fn execute_video(
        config: Arc<WorkerConfig>,
        factory: Arc<dyn SegmenterFactory>,
        job: VideoJob,
        progress: ProgressReporter,
    ) -> WorkerResult<VideoOutcome> {
        let result = async {
            let segmenter = factory.build()?;
            let processor = VideoProcessor::new(config, segmenter);
            processor.process(&job, &progress).await
        }
        .await;

        match &result {
            Ok(outcome) => {
                metrics::record_video_processed(outcome.summary.is_some());
            }
            Err(e) => {
                if e.is_input_error() {
                    warn!(video_id = %job.video_id, "Video rejected: {}", e);
                } else {
                    error!(video_id = %job.video_id, "Video failed: {}", e);
                }
                metrics::record_video_failed(e);
                progress.fail(e.to_string());
            }
        }
        result
    }
}

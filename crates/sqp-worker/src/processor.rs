//! Per-video processing pipeline.
//!
//! probe → extract frames → detect main view → partition → record →
//! (per chunk: materialize → track → persist) → merge → summary.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

use sqp_media::chunking::{group_markers, partition_runs, validate_tiling};
use sqp_media::command::FfmpegRunner;
use sqp_media::decode::FfmpegFrameSource;
use sqp_media::extract::extract_frames;
use sqp_media::fs_utils::write_json;
use sqp_media::mainview::{MainviewDetection, MainviewDetector};
use sqp_media::materialize::{chunk_dir, materialize_chunk};
use sqp_media::merge::{merge_chunk_results, ArtifactKind};
use sqp_media::probe::probe_video;
use sqp_media::progress::ProgressReporter;
use sqp_media::tracker::{PromptableSegmenter, TrackingSession};
use sqp_media::{MediaError, MediaResult};
use sqp_models::{
    Chunk, ChunkFailure, MainviewRecord, Marker, ProcessingStage, SegmentationSummary, VideoId,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::VideoLogger;
use crate::metrics;

pub const FRAMES_DIR: &str = "frames";
pub const SEGMENTATION_DIR: &str = "segmentation";
pub const MAINVIEW_RECORD_FILE: &str = "mainview_timestamp.json";
pub const SEGMENTATION_SUMMARY_FILE: &str = "segmentation.json";

/// One video to process.
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub video_id: VideoId,
    pub video_path: PathBuf,
    /// Without markers only detection and partitioning run
    pub markers: Vec<Marker>,
}

/// What a finished video left on disk.
#[derive(Debug, Clone)]
pub struct VideoOutcome {
    pub video_dir: PathBuf,
    pub record: MainviewRecord,
    pub summary: Option<SegmentationSummary>,
}

/// Runs the full pipeline for one video at a time.
///
/// Chunks of a video are tracked strictly one after another so that a
/// single backend session is alive at any moment.
pub struct VideoProcessor {
    config: Arc<WorkerConfig>,
    runner: FfmpegRunner,
    segmenter: Arc<dyn PromptableSegmenter>,
}

impl VideoProcessor {
    pub fn new(config: Arc<WorkerConfig>, segmenter: Arc<dyn PromptableSegmenter>) -> Self {
        Self {
            config,
            runner: FfmpegRunner::new(),
            segmenter,
        }
    }

    pub async fn process(&self, job: &VideoJob, progress: &ProgressReporter) -> WorkerResult<VideoOutcome> {
        let logger = VideoLogger::new(&job.video_id, "video_processing");
        self.process_inner(job, progress, &logger)
            .instrument(logger.create_span())
            .await
    }

    async fn process_inner(
        &self,
        job: &VideoJob,
        progress: &ProgressReporter,
        logger: &VideoLogger,
    ) -> WorkerResult<VideoOutcome> {
        logger.log_start(&job.video_path.display().to_string());

        for marker in &job.markers {
            marker
                .validate()
                .map_err(|e| MediaError::invalid_marker(e.to_string()))?;
        }

        let video_dir = self.config.video_dir(job.video_id.as_str());
        let frames_dir = video_dir.join(FRAMES_DIR);

        let info = probe_video(&job.video_path).await?;
        progress.stage(ProcessingStage::Extracting, 0.0);
        {
            let total = info.total_frames;
            let reporter = progress.clone();
            extract_frames(&self.runner, &job.video_path, &frames_dir, move |p| {
                reporter.stage(ProcessingStage::Extracting, p.fraction(total));
            })
            .await?;
        }
        logger.log_progress("frames extracted");

        let detection = self.detect(&job.video_path, progress).await?;
        logger.log_progress(&format!("{} main-view runs", detection.runs.len()));

        progress.stage(ProcessingStage::Partitioning, 0.0);
        let (record, chunks, grouped) = self.plan(&video_dir, &detection, &job.markers).await?;
        progress.stage(ProcessingStage::Partitioning, 1.0);

        let summary = if job.markers.is_empty() {
            debug!(video_id = %job.video_id, "No markers, stopping after partitioning");
            None
        } else {
            Some(
                self.segment(&video_dir, &chunks, &grouped, job.markers.clone(), progress)
                    .await?,
            )
        };

        if let Some(summary) = summary.as_ref().filter(|s| !s.is_complete()) {
            logger.log_warning(&format!(
                "{} of {} chunks not tracked, {} artifacts kept",
                summary.failed_chunks.len(),
                chunks.len(),
                summary.artifact_count()
            ));
            return Err(WorkerError::ChunkSessionsFailed {
                chunks: summary.failed_chunks.iter().map(|f| f.chunk).collect(),
            });
        }

        progress.complete();
        logger.log_completion(&format!(
            "{} chunks, {} artifacts",
            chunks.len(),
            summary.as_ref().map_or(0, |s| s.artifact_count())
        ));

        Ok(VideoOutcome {
            video_dir,
            record,
            summary,
        })
    }

    async fn detect(&self, video_path: &Path, progress: &ProgressReporter) -> WorkerResult<MainviewDetection> {
        let started = Instant::now();
        progress.stage(ProcessingStage::Detecting, 0.0);

        let detector = MainviewDetector::new(self.config.mainview.clone())?;
        let mut source = FfmpegFrameSource::open(video_path).await?;
        let detection = detector
            .detect_with_progress(&mut source, |f| progress.stage(ProcessingStage::Detecting, f))
            .await?;

        metrics::record_detection(started.elapsed().as_secs_f64());
        Ok(detection)
    }

    /// Partition the runs, assign markers and persist the main-view record.
    ///
    /// Markers are checked before the record is written so an invalid
    /// request leaves nothing behind.
    pub async fn plan(
        &self,
        video_dir: &Path,
        detection: &MainviewDetection,
        markers: &[Marker],
    ) -> WorkerResult<(MainviewRecord, Vec<Chunk>, Vec<Vec<Marker>>)> {
        let chunks = partition_runs(&detection.runs, self.config.chunk_capacity)?;
        validate_tiling(&detection.runs, &chunks)?;
        let grouped = group_markers(&chunks, markers)?;

        let record = MainviewRecord::new(
            detection.fps,
            detection.total_frames,
            detection.runs.clone(),
            &chunks,
        );
        write_json(video_dir.join(MAINVIEW_RECORD_FILE), &record).await?;

        info!(
            runs = detection.runs.len(),
            chunks = chunks.len(),
            capacity = self.config.chunk_capacity,
            "Main-view record written"
        );
        Ok((record, chunks, grouped))
    }

    /// Track every chunk that has markers, merge the results and write the
    /// segmentation summary.
    ///
    /// Any previous segmentation output of the video is discarded first. A
    /// chunk whose tracking session cannot start is listed in
    /// `failed_chunks`; the other chunks are still merged.
    pub async fn segment(
        &self,
        video_dir: &Path,
        chunks: &[Chunk],
        grouped: &[Vec<Marker>],
        markers: Vec<Marker>,
        progress: &ProgressReporter,
    ) -> WorkerResult<SegmentationSummary> {
        let seg_dir = video_dir.join(SEGMENTATION_DIR);
        if tokio::fs::try_exists(&seg_dir).await? {
            tokio::fs::remove_dir_all(&seg_dir).await?;
        }
        tokio::fs::create_dir_all(&seg_dir).await?;

        let selected: BTreeSet<usize> = chunks.iter().map(|c| c.index).collect();
        self.track_and_merge(video_dir, chunks, grouped, &selected, markers, progress)
            .await
    }

    /// Track again only the chunks `previous` lists as failed.
    ///
    /// Artifacts of completed chunks stay in place and are merged together
    /// with the retried ones.
    pub async fn retry_failed_chunks(
        &self,
        video_dir: &Path,
        chunks: &[Chunk],
        grouped: &[Vec<Marker>],
        previous: SegmentationSummary,
        progress: &ProgressReporter,
    ) -> WorkerResult<SegmentationSummary> {
        let seg_dir = video_dir.join(SEGMENTATION_DIR);
        let selected: BTreeSet<usize> = previous.failed_chunks.iter().map(|f| f.chunk).collect();

        for &index in &selected {
            let dir = chunk_dir(&seg_dir, index);
            for kind in ArtifactKind::ALL {
                let artifacts = dir.join(kind.dir_name());
                if tokio::fs::try_exists(&artifacts).await? {
                    tokio::fs::remove_dir_all(&artifacts).await?;
                }
            }
        }

        info!(chunks = ?selected, "Retrying failed chunks");
        self.track_and_merge(video_dir, chunks, grouped, &selected, previous.markers, progress)
            .await
    }

    async fn track_and_merge(
        &self,
        video_dir: &Path,
        chunks: &[Chunk],
        grouped: &[Vec<Marker>],
        selected: &BTreeSet<usize>,
        markers: Vec<Marker>,
        progress: &ProgressReporter,
    ) -> WorkerResult<SegmentationSummary> {
        let frames_dir = video_dir.join(FRAMES_DIR);
        let seg_dir = video_dir.join(SEGMENTATION_DIR);
        let mut failed = Vec::new();

        let total = chunks.len();
        for (chunk, chunk_markers) in chunks.iter().zip(grouped) {
            if !selected.contains(&chunk.index) {
                continue;
            }
            progress.chunk(chunk.index, total, 0.0);
            if chunk_markers.is_empty() {
                debug!(chunk = chunk.index, "No markers in chunk, skipping tracking");
                continue;
            }
            match self
                .track_chunk(&frames_dir, &seg_dir, chunk, chunk_markers, total, progress)
                .await
            {
                Ok(_) => progress.chunk(chunk.index, total, 1.0),
                Err(WorkerError::Media(MediaError::SessionInit(reason))) => {
                    warn!(chunk = chunk.index, "Tracking session failed to start: {}", reason);
                    metrics::record_chunk_failed(self.segmenter.name());
                    progress.message(format!("chunk {} not tracked: {}", chunk.index, reason));
                    failed.push(ChunkFailure {
                        chunk: chunk.index,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        progress.stage(ProcessingStage::Merging, 0.0);
        let report = merge_chunk_results(&seg_dir).await?;
        let mut summary = report.into_summary(markers);
        summary.failed_chunks = failed;
        write_json(video_dir.join(SEGMENTATION_SUMMARY_FILE), &summary).await?;
        progress.stage(ProcessingStage::Merging, 1.0);

        Ok(summary)
    }

    async fn track_chunk(
        &self,
        frames_dir: &Path,
        seg_dir: &Path,
        chunk: &Chunk,
        markers: &[Marker],
        total_chunks: usize,
        progress: &ProgressReporter,
    ) -> WorkerResult<usize> {
        let started = Instant::now();
        let dir = chunk_dir(seg_dir, chunk.index);

        let frames = materialize_chunk(
            frames_dir,
            &dir,
            chunk,
            self.config.mainview.every_n_frame,
            markers,
        )
        .await?;

        let mut session = TrackingSession::init(Arc::clone(&self.segmenter), frames, self.config.offload)
            .await?
            .with_max_frames(self.config.max_frames_per_propagation);

        let result: MediaResult<usize> = async {
            for marker in markers {
                session.add_annotation(marker).await?;
            }
            progress.chunk(chunk.index, total_chunks, 0.3);
            session.propagate().await?;
            progress.chunk(chunk.index, total_chunks, 0.9);
            session.persist(&dir).await
        }
        .await;
        let released = session.release().await;
        let persisted = result?;
        released?;

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_chunk_tracked(self.segmenter.name(), elapsed, persisted);
        info!(
            chunk = chunk.index,
            markers = markers.len(),
            artifacts = persisted,
            elapsed_secs = elapsed,
            "Chunk tracked"
        );
        Ok(persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqp_media::fs_utils::read_json;
    use sqp_media::materialize::{frame_file_name, FrameSet};
    use sqp_media::merge::{artifact_path, RESULTS_DIR};
    use sqp_media::phash::PerceptualHash;
    use sqp_media::tracker::{
        ObjectPrompt, OffloadPolicy, PromptGeometrySegmenter, PropagateRequest, PropagatedFrame,
        SessionHandle, SessionInfo,
    };
    use sqp_models::{BBox, ObjectId, Point, RleMask, Run};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Geometry backend whose `fail_on`-th session (1-based) cannot start.
    struct FailingInitSegmenter {
        inner: PromptGeometrySegmenter,
        inits: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl PromptableSegmenter for FailingInitSegmenter {
        fn name(&self) -> &'static str {
            "failing-init"
        }

        async fn init_state(&self, frames: &FrameSet, offload: OffloadPolicy) -> MediaResult<SessionInfo> {
            if self.inits.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(MediaError::session_init("out of device memory"));
            }
            self.inner.init_state(frames, offload).await
        }

        async fn add_prompt(&self, session: &SessionHandle, prompt: &ObjectPrompt) -> MediaResult<RleMask> {
            self.inner.add_prompt(session, prompt).await
        }

        async fn clear_prompts(&self, session: &SessionHandle, frame_idx: usize, object_id: &ObjectId) -> MediaResult<()> {
            self.inner.clear_prompts(session, frame_idx, object_id).await
        }

        async fn propagate(&self, session: &SessionHandle, request: PropagateRequest) -> MediaResult<Vec<PropagatedFrame>> {
            self.inner.propagate(session, request).await
        }

        async fn reset_state(&self, session: &SessionHandle) -> MediaResult<()> {
            self.inner.reset_state(session).await
        }

        async fn release(&self, session: &SessionHandle) -> MediaResult<()> {
            self.inner.release(session).await
        }
    }

    fn processor(capacity: u64, every_n_frame: u64) -> VideoProcessor {
        let mut config = WorkerConfig {
            chunk_capacity: capacity,
            ..Default::default()
        };
        config.mainview.every_n_frame = every_n_frame;
        VideoProcessor::new(Arc::new(config), Arc::new(PromptGeometrySegmenter::new(4.0)))
    }

    fn detection(runs: &[(u64, u64)]) -> MainviewDetection {
        MainviewDetection {
            fps: 25.0,
            total_frames: runs.last().map_or(0, |r| r.1 + 1),
            runs: runs.iter().map(|&(s, e)| Run::from_frames(s, e, 25.0)).collect(),
            typical_hash: PerceptualHash(0),
        }
    }

    fn write_source_frames(video_dir: &Path, total: u64) {
        let dir = video_dir.join(FRAMES_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        for f in 0..total {
            image::GrayImage::new(64, 48)
                .save(dir.join(frame_file_name(f)))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_plan_writes_record() {
        let dir = TempDir::new().unwrap();
        let p = processor(100, 5);
        let (record, chunks, grouped) = p
            .plan(dir.path(), &detection(&[(0, 249)]), &[])
            .await
            .unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(grouped.len(), 3);
        let on_disk: MainviewRecord = read_json(dir.path().join(MAINVIEW_RECORD_FILE)).await.unwrap();
        assert_eq!(on_disk, record);
        assert_eq!(on_disk.chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_plan_rejects_marker_outside_runs() {
        let dir = TempDir::new().unwrap();
        let p = processor(100, 5);
        let marker = Marker::positive(420, "1", vec![Point::new(5.0, 5.0)]);
        let err = p
            .plan(dir.path(), &detection(&[(0, 395), (455, 999)]), &[marker])
            .await
            .unwrap_err();

        assert!(err.is_input_error());
        assert!(!dir.path().join(MAINVIEW_RECORD_FILE).exists());
    }

    #[tokio::test]
    async fn test_segment_tracks_marked_chunks() {
        let dir = TempDir::new().unwrap();
        write_source_frames(dir.path(), 60);
        let p = processor(30, 5);

        let markers = vec![
            Marker::positive(10, "1", vec![Point::new(20.0, 20.0)]),
            Marker::positive(40, "1", vec![Point::new(30.0, 20.0)]),
        ];
        let (_, chunks, grouped) = p
            .plan(dir.path(), &detection(&[(0, 59)]), &markers)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);

        let progress = ProgressReporter::new(VideoId::from_string("v"));
        let summary = p
            .segment(dir.path(), &chunks, &grouped, markers, &progress)
            .await
            .unwrap();

        let id = ObjectId::from("1");
        // Every strided frame of both chunks, empty or not
        assert_eq!(
            summary.objects[&id].frames,
            vec![0, 5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55]
        );

        let bbox: BBox = read_json(artifact_path(
            dir.path().join(SEGMENTATION_DIR).join(RESULTS_DIR),
            ArtifactKind::Boxes,
            &id,
            50,
        ))
        .await
        .unwrap();
        assert!(!bbox.is_empty());
        assert!(dir.path().join(SEGMENTATION_SUMMARY_FILE).exists());
        assert!(progress.snapshot().percent >= 95.0);
    }

    #[tokio::test]
    async fn test_segment_missing_frame_is_input_error() {
        let dir = TempDir::new().unwrap();
        write_source_frames(dir.path(), 10);
        let p = processor(100, 5);

        let markers = vec![Marker::positive(2, "1", vec![Point::new(1.0, 1.0)])];
        let (_, chunks, grouped) = p
            .plan(dir.path(), &detection(&[(0, 19)]), &markers)
            .await
            .unwrap();

        let progress = ProgressReporter::new(VideoId::from_string("v"));
        let err = p
            .segment(dir.path(), &chunks, &grouped, markers, &progress)
            .await
            .unwrap_err();
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn test_session_init_failure_keeps_completed_chunks() {
        let dir = TempDir::new().unwrap();
        write_source_frames(dir.path(), 60);

        let mut config = WorkerConfig {
            chunk_capacity: 30,
            ..Default::default()
        };
        config.mainview.every_n_frame = 5;
        let config = Arc::new(config);
        let failing = VideoProcessor::new(
            Arc::clone(&config),
            Arc::new(FailingInitSegmenter {
                inner: PromptGeometrySegmenter::new(4.0),
                inits: AtomicUsize::new(0),
                fail_on: 2,
            }),
        );

        let markers = vec![
            Marker::positive(10, "1", vec![Point::new(20.0, 20.0)]),
            Marker::positive(40, "1", vec![Point::new(30.0, 20.0)]),
        ];
        let (_, chunks, grouped) = failing
            .plan(dir.path(), &detection(&[(0, 59)]), &markers)
            .await
            .unwrap();

        let progress = ProgressReporter::new(VideoId::from_string("v"));
        let summary = failing
            .segment(dir.path(), &chunks, &grouped, markers, &progress)
            .await
            .unwrap();

        assert!(!summary.is_complete());
        assert_eq!(summary.failed_chunks.len(), 1);
        assert_eq!(summary.failed_chunks[0].chunk, 1);
        assert!(summary.failed_chunks[0].reason.contains("device memory"));
        assert!(progress.snapshot().message.unwrap().starts_with("chunk 1 not tracked"));

        // The first chunk is merged and recorded despite the second failing
        let id = ObjectId::from("1");
        assert_eq!(summary.objects[&id].frames, vec![0, 5, 10, 15, 20, 25]);
        let on_disk: SegmentationSummary = read_json(dir.path().join(SEGMENTATION_SUMMARY_FILE))
            .await
            .unwrap();
        assert_eq!(on_disk, summary);

        // Retrying only re-tracks the failed chunk
        let healthy = VideoProcessor::new(config, Arc::new(PromptGeometrySegmenter::new(4.0)));
        let retried = healthy
            .retry_failed_chunks(dir.path(), &chunks, &grouped, summary, &progress)
            .await
            .unwrap();
        assert!(retried.is_complete());
        assert_eq!(
            retried.objects[&id].frames,
            vec![0, 5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55]
        );
    }

    #[tokio::test]
    async fn test_segment_rejects_path_like_object_id() {
        let dir = TempDir::new().unwrap();
        write_source_frames(dir.path(), 20);
        let p = processor(100, 5);

        let markers = vec![Marker::positive(5, "team/1", vec![Point::new(10.0, 10.0)])];
        let (_, chunks, grouped) = p
            .plan(dir.path(), &detection(&[(0, 19)]), &markers)
            .await
            .unwrap();

        let progress = ProgressReporter::new(VideoId::from_string("v"));
        let err = p
            .segment(dir.path(), &chunks, &grouped, markers, &progress)
            .await
            .unwrap_err();
        assert!(err.is_input_error());
        assert!(!dir.path().join(SEGMENTATION_SUMMARY_FILE).exists());
        assert!(!dir.path().join(SEGMENTATION_DIR).join("chunk_0/masks/team").exists());
    }
}

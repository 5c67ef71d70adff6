//! Media processing for squash match videos.
//!
//! This crate provides:
//! - FFmpeg/FFprobe plumbing (probing, frame export, streaming decode)
//! - DCT perceptual hashing and two-pass main-view detection
//! - Capacity-bounded chunk partitioning and per-chunk frame staging
//! - A tracker adapter over promptable video segmentation backends
//! - Mask codecs and merging of per-chunk results

pub mod chunking;
pub mod command;
pub mod decode;
pub mod error;
pub mod extract;
pub mod fs_utils;
pub mod mainview;
pub mod mask;
pub mod materialize;
pub mod merge;
pub mod phash;
pub mod probe;
pub mod progress;
pub mod tracker;

pub use chunking::{chunk_for_frame, group_markers, partition_runs, validate_tiling};
pub use command::{FfmpegCommand, FfmpegRunner};
pub use decode::{FfmpegFrameSource, FrameSource, GrayFrame};
pub use error::{MediaError, MediaResult};
pub use extract::extract_frames;
pub use mainview::{detect_main_view, MainviewConfig, MainviewDetection, MainviewDetector};
pub use mask::{decode_rle, encode_rle, mask_to_bbox, rle_bbox, BinaryMask};
pub use materialize::{chunk_dir, materialize_chunk, FrameSet};
pub use merge::{merge_chunk_results, ArtifactKind, MergeReport};
pub use phash::{distance, phash, PerceptualHash, PhashEngine};
pub use probe::{probe_video, VideoInfo};
pub use progress::{FfmpegProgress, ProgressReporter};
pub use tracker::{
    ObjectPrompt, OffloadPolicy, PointSpace, PromptGeometrySegmenter, PromptableSegmenter,
    PropagateRequest, PropagatedFrame, PropagationDirection, SessionHandle, SessionInfo,
    SessionState, TrackingSession,
};

//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;

use sqp_media::mainview::MainviewConfig;
use sqp_media::tracker::OffloadPolicy;

/// Which tracker backend each worker task builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterBackend {
    /// Remote promptable segmentation service
    Remote,
    /// In-process prompt geometry (dry runs, no model)
    Geometry,
}

impl FromStr for SegmenterBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(SegmenterBackend::Remote),
            "geometry" => Ok(SegmenterBackend::Geometry),
            other => Err(format!("unknown segmenter backend '{}'", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the per-video working directories
    pub work_dir: PathBuf,
    /// Maximum videos processed concurrently
    pub max_concurrent_videos: usize,
    /// Maximum frames per chunk
    pub chunk_capacity: u64,
    /// Main-view detection parameters
    pub mainview: MainviewConfig,
    pub segmenter: SegmenterBackend,
    pub offload: OffloadPolicy,
    /// Ceiling on frames visited per propagation sweep
    pub max_frames_per_propagation: Option<usize>,
    /// Prometheus listener address, disabled when unset
    pub metrics_addr: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/sqp"),
            max_concurrent_videos: 2,
            chunk_capacity: 2500,
            mainview: MainviewConfig::default(),
            segmenter: SegmenterBackend::Remote,
            offload: OffloadPolicy {
                offload_video_to_cpu: true,
                offload_state_to_cpu: false,
            },
            max_frames_per_propagation: None,
            metrics_addr: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mainview = defaults.mainview.clone();

        Self {
            work_dir: std::env::var("SQP_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_concurrent_videos: env_parse("SQP_MAX_VIDEOS").unwrap_or(defaults.max_concurrent_videos),
            chunk_capacity: env_parse("SQP_CHUNK_CAPACITY").unwrap_or(defaults.chunk_capacity),
            mainview: MainviewConfig {
                every_n_frame: env_parse("SQP_EVERY_N_FRAME").unwrap_or(mainview.every_n_frame),
                crop_ratio: env_parse("SQP_CROP_RATIO").unwrap_or(mainview.crop_ratio),
                max_distance: env_parse("SQP_MAX_DISTANCE").unwrap_or(mainview.max_distance),
                sample_fraction: env_parse("SQP_SAMPLE_FRACTION").unwrap_or(mainview.sample_fraction),
                ..mainview
            },
            segmenter: env_parse("SQP_SEGMENTER").unwrap_or(defaults.segmenter),
            offload: OffloadPolicy {
                offload_video_to_cpu: env_flag("SQP_OFFLOAD_VIDEO")
                    .unwrap_or(defaults.offload.offload_video_to_cpu),
                offload_state_to_cpu: env_flag("SQP_OFFLOAD_STATE")
                    .unwrap_or(defaults.offload.offload_state_to_cpu),
            },
            max_frames_per_propagation: env_parse::<usize>("SQP_MAX_FRAMES_PER_PROPAGATION")
                .filter(|n| *n > 0),
            metrics_addr: std::env::var("SQP_METRICS_ADDR").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Working directory of one video.
    pub fn video_dir(&self, video_id: &str) -> PathBuf {
        self.work_dir.join(video_id)
    }
}

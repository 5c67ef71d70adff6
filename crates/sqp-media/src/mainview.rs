//! Main-view detection.
//!
//! Two passes over a decoded stream:
//!
//! 1. **Vote**: a bounded random sample of strided frames is hashed and the
//!    most frequent fingerprint becomes the typical main-view hash.
//! 2. **Scan**: every strided frame is compared with the typical hash and an
//!    onset/offset state machine emits contiguous [`Run`]s.
//!
//! Only the source's single frame buffer is alive at any time.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use sqp_models::{FrameIndex, Run, SubRun};

use crate::decode::{FfmpegFrameSource, FrameSource};
use crate::error::{MediaError, MediaResult};
use crate::phash::{PerceptualHash, PhashEngine};

/// Detector tuning.
#[derive(Debug, Clone)]
pub struct MainviewConfig {
    /// Sampling stride in frames
    pub every_n_frame: u64,
    /// Fraction of the frame height kept from the top
    pub crop_ratio: f64,
    /// Max Hamming distance still counted as the main view
    pub max_distance: u32,
    /// Fraction of strided frames that vote
    pub sample_fraction: f64,
    pub min_samples: usize,
    pub max_samples: usize,
    /// Seed for vote sampling
    pub sample_seed: u64,
}

impl Default for MainviewConfig {
    fn default() -> Self {
        Self {
            every_n_frame: 5,
            crop_ratio: 0.33,
            max_distance: 10,
            sample_fraction: 0.10,
            min_samples: 16,
            max_samples: 2000,
            sample_seed: 0x5155_4153_48,
        }
    }
}

impl MainviewConfig {
    pub fn validate(&self) -> MediaResult<()> {
        if self.every_n_frame == 0 {
            return Err(MediaError::invalid_config("every_n_frame must be positive"));
        }
        if !(self.crop_ratio > 0.0 && self.crop_ratio <= 1.0) {
            return Err(MediaError::invalid_config(format!(
                "crop_ratio must be in (0, 1], got {}",
                self.crop_ratio
            )));
        }
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(MediaError::invalid_config(format!(
                "sample_fraction must be in (0, 1], got {}",
                self.sample_fraction
            )));
        }
        if self.min_samples == 0 || self.min_samples > self.max_samples {
            return Err(MediaError::invalid_config(format!(
                "sample bounds must satisfy 0 < min ({}) <= max ({})",
                self.min_samples, self.max_samples
            )));
        }
        Ok(())
    }

    /// Set the sampling stride.
    pub fn with_every_n_frame(mut self, every_n_frame: u64) -> Self {
        self.every_n_frame = every_n_frame;
        self
    }

    pub fn with_sample_fraction(mut self, fraction: f64) -> Self {
        self.sample_fraction = fraction;
        self
    }

    /// Number of voting frames for `strided` candidates.
    fn sample_size(&self, strided: usize) -> usize {
        let wanted = (strided as f64 * self.sample_fraction).ceil() as usize;
        wanted.clamp(self.min_samples, self.max_samples).min(strided)
    }
}

/// Detector output.
#[derive(Debug, Clone)]
pub struct MainviewDetection {
    pub fps: f64,
    /// Frames decoded by the scan pass
    pub total_frames: u64,
    /// Sorted, non-overlapping main-view runs
    pub runs: Vec<Run>,
    pub typical_hash: PerceptualHash,
}

/// Onset/offset state machine over strided similarity samples.
#[derive(Debug)]
pub(crate) struct RunTracker {
    stride: u64,
    open: Option<FrameIndex>,
    runs: Vec<SubRun>,
}

impl RunTracker {
    pub(crate) fn new(stride: u64) -> Self {
        Self {
            stride,
            open: None,
            runs: Vec::new(),
        }
    }

    pub(crate) fn observe(&mut self, frame: FrameIndex, similar: bool) {
        match (self.open, similar) {
            (None, true) => self.open = Some(frame),
            (Some(start), false) => {
                let end = frame.saturating_sub(self.stride).max(start);
                self.runs.push(SubRun::new(start, end));
                self.open = None;
            }
            _ => {}
        }
    }

    /// Close a run still open at end of stream.
    pub(crate) fn finish(mut self, last_frame: Option<FrameIndex>) -> Vec<SubRun> {
        if let (Some(start), Some(last)) = (self.open.take(), last_frame) {
            self.runs.push(SubRun::new(start, last.max(start)));
        }
        self.runs
    }
}

/// Two-pass main-view detector.
#[derive(Debug)]
pub struct MainviewDetector {
    config: MainviewConfig,
    engine: PhashEngine,
}

impl MainviewDetector {
    pub fn new(config: MainviewConfig) -> MediaResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            engine: PhashEngine::new(),
        })
    }

    pub fn config(&self) -> &MainviewConfig {
        &self.config
    }

    fn hash_current<S: FrameSource + ?Sized>(&self, source: &S) -> MediaResult<PerceptualHash> {
        let (pixels, width, rows) = source.current().top_crop(self.config.crop_ratio);
        self.engine.hash_luma(pixels, width, rows)
    }

    /// Run both passes.
    pub async fn detect<S: FrameSource + ?Sized>(&self, source: &mut S) -> MediaResult<MainviewDetection> {
        self.detect_with_progress(source, |_| {}).await
    }

    /// Run both passes, reporting overall completion (0.0 - 1.0).
    pub async fn detect_with_progress<S, F>(
        &self,
        source: &mut S,
        mut on_progress: F,
    ) -> MediaResult<MainviewDetection>
    where
        S: FrameSource + ?Sized,
        F: FnMut(f64) + Send,
    {
        source.rewind().await?;
        let typical = self.vote(source, |f| on_progress(f * 0.5)).await?;

        source.rewind().await?;
        let (runs, total_frames) = self.scan(source, typical, |f| on_progress(0.5 + f * 0.5)).await?;
        on_progress(1.0);

        info!(
            typical_hash = %typical,
            runs = runs.len(),
            total_frames,
            "Main-view detection finished"
        );

        Ok(MainviewDetection {
            fps: source.fps(),
            total_frames,
            runs,
            typical_hash: typical,
        })
    }

    /// Voting pass: plurality hash of a seeded random sample of strided frames.
    ///
    /// Ties go to the hash seen first in decode order. Without a frame count
    /// hint every strided frame votes.
    pub async fn vote<S, F>(&self, source: &mut S, mut on_progress: F) -> MediaResult<PerceptualHash>
    where
        S: FrameSource + ?Sized,
        F: FnMut(f64) + Send,
    {
        let stride = self.config.every_n_frame;
        let hint = source.frame_count_hint();

        let chosen: Option<Vec<usize>> = hint.map(|total| {
            let strided = total.div_ceil(stride) as usize;
            let amount = self.config.sample_size(strided);
            let mut rng = StdRng::seed_from_u64(self.config.sample_seed);
            let mut picks = index::sample(&mut rng, strided, amount).into_vec();
            picks.sort_unstable();
            picks
        });

        // hash -> (votes, first seen)
        let mut tally: HashMap<PerceptualHash, (u32, usize)> = HashMap::new();
        let mut fallback: Option<PerceptualHash> = None;
        let mut cursor = 0usize;
        let mut decoded = 0u64;

        while let Some(frame) = source.advance().await? {
            decoded += 1;
            if frame % stride != 0 {
                continue;
            }
            let ordinal = (frame / stride) as usize;

            let selected = match &chosen {
                None => true,
                Some(picks) => {
                    while cursor < picks.len() && picks[cursor] < ordinal {
                        cursor += 1;
                    }
                    cursor < picks.len() && picks[cursor] == ordinal
                }
            };

            if !selected && fallback.is_some() {
                continue;
            }

            let hash = self.hash_current(source)?;
            if fallback.is_none() {
                fallback = Some(hash);
            }
            if selected {
                let order = tally.len();
                tally.entry(hash).or_insert((0, order)).0 += 1;
            }

            if let Some(total) = hint {
                on_progress(frame as f64 / total as f64);
            }
        }

        if decoded == 0 {
            return Err(MediaError::InvalidVideo("no decodable frames".to_string()));
        }

        let typical = tally
            .iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
            .map(|(hash, _)| *hash)
            .or(fallback)
            .ok_or_else(|| MediaError::InvalidVideo("no frames sampled for voting".to_string()))?;

        debug!(
            voters = tally.values().map(|v| v.0).sum::<u32>(),
            distinct = tally.len(),
            typical = %typical,
            "Vote pass finished"
        );

        Ok(typical)
    }

    /// Scan pass: emit runs of frames similar to `typical`.
    ///
    /// Returns the runs and the number of frames decoded.
    pub async fn scan<S, F>(
        &self,
        source: &mut S,
        typical: PerceptualHash,
        mut on_progress: F,
    ) -> MediaResult<(Vec<Run>, u64)>
    where
        S: FrameSource + ?Sized,
        F: FnMut(f64) + Send,
    {
        let stride = self.config.every_n_frame;
        let hint = source.frame_count_hint();
        let mut tracker = RunTracker::new(stride);
        let mut last_frame = None;

        while let Some(frame) = source.advance().await? {
            last_frame = Some(frame);
            if frame % stride != 0 {
                continue;
            }
            let hash = self.hash_current(source)?;
            tracker.observe(frame, hash.is_similar(&typical, self.config.max_distance));

            if let Some(total) = hint {
                on_progress(frame as f64 / total as f64);
            }
        }

        let total_frames = last_frame.map_or(0, |f| f + 1);
        if total_frames == 0 {
            return Err(MediaError::InvalidVideo("no decodable frames".to_string()));
        }

        let fps = source.fps();
        let runs = tracker
            .finish(last_frame)
            .into_iter()
            .map(|r| Run::from_frames(r.start_frame, r.end_frame, fps))
            .collect();

        Ok((runs, total_frames))
    }
}

/// Detect main-view runs of the video at `path`.
pub async fn detect_main_view(
    path: impl AsRef<Path>,
    config: MainviewConfig,
) -> MediaResult<MainviewDetection> {
    let detector = MainviewDetector::new(config)?;
    let mut source = FfmpegFrameSource::open(path).await?;
    detector.detect(&mut source).await
}

//! Streaming grayscale frame decoding.
//!
//! The detector walks a video twice, start to finish, holding a single
//! frame buffer that is overwritten on every advance. [`FrameSource`] is the
//! seam between the detector and the decoder so the detector can run over
//! synthetic frames.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tracing::{debug, warn};

use sqp_models::FrameIndex;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

/// One decoded 8-bit grayscale frame.
#[derive(Debug, Clone, Default)]
pub struct GrayFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major luma, `width * height` bytes
    pub data: Vec<u8>,
}

impl GrayFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    /// Number of rows kept when cropping to the top `ratio` of the frame.
    pub fn crop_rows(&self, ratio: f64) -> u32 {
        ((self.height as f64 * ratio) as u32).clamp(1, self.height.max(1))
    }

    /// Top `ratio` of the frame as a borrowed row-major slice.
    pub fn top_crop(&self, ratio: f64) -> (&[u8], u32, u32) {
        let rows = self.crop_rows(ratio);
        let len = rows as usize * self.width as usize;
        (&self.data[..len.min(self.data.len())], self.width, rows)
    }
}

/// Sequential, rewindable source of decoded frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Frames per second of the underlying video.
    fn fps(&self) -> f64;

    /// Frame count reported by the container, if known.
    fn frame_count_hint(&self) -> Option<u64>;

    /// Decode the next frame into the current buffer.
    ///
    /// Returns its index, or `None` at end of stream.
    async fn advance(&mut self) -> MediaResult<Option<FrameIndex>>;

    /// Frame decoded by the last successful [`advance`](Self::advance).
    fn current(&self) -> &GrayFrame;

    /// Restart decoding from frame 0.
    async fn rewind(&mut self) -> MediaResult<()>;
}

/// Decoder reading raw gray frames from an FFmpeg pipe.
pub struct FfmpegFrameSource {
    path: PathBuf,
    info: VideoInfo,
    runner: FfmpegRunner,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    frame: GrayFrame,
    next_index: FrameIndex,
    exhausted: bool,
}

impl FfmpegFrameSource {
    /// Probe `path` and prepare a decoder; FFmpeg is spawned on first advance.
    pub async fn open(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref().to_path_buf();
        let info = probe_video(&path).await?;
        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            frames = info.total_frames,
            "Opened video for decoding"
        );
        Ok(Self {
            frame: GrayFrame::new(info.width, info.height),
            path,
            info,
            runner: FfmpegRunner::new(),
            child: None,
            stdout: None,
            next_index: 0,
            exhausted: false,
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn spawn(&mut self) -> MediaResult<()> {
        let cmd = FfmpegCommand::to_stdout(&self.path).raw_gray();
        let mut child = self.runner.spawn_stdout(&cmd)?;
        self.stdout = child.stdout.take();
        if self.stdout.is_none() {
            return Err(MediaError::internal("FFmpeg stdout not captured"));
        }
        self.child = Some(child);
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }

    /// Called on EOF: distinguishes an empty stream from a decode failure.
    async fn finish(&mut self) -> MediaResult<()> {
        self.exhausted = true;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let status = child.wait().await?;
            if !status.success() && self.next_index == 0 {
                return Err(MediaError::InvalidVideo(format!(
                    "FFmpeg could not decode {} (exit code {:?})",
                    self.path.display(),
                    status.code()
                )));
            }
            if !status.success() {
                warn!(
                    path = %self.path.display(),
                    decoded = self.next_index,
                    "FFmpeg exited with an error after partial decode"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn fps(&self) -> f64 {
        self.info.fps
    }

    fn frame_count_hint(&self) -> Option<u64> {
        Some(self.info.total_frames).filter(|n| *n > 0)
    }

    async fn advance(&mut self) -> MediaResult<Option<FrameIndex>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.stdout.is_none() {
            self.spawn()?;
        }

        let read = match self.stdout.as_mut() {
            Some(stdout) => stdout.read_exact(&mut self.frame.data).await,
            None => return Err(MediaError::internal("decoder not running")),
        };

        match read {
            Ok(_) => {
                let index = self.next_index;
                self.next_index += 1;
                Ok(Some(index))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.finish().await?;
                Ok(None)
            }
            Err(e) => {
                self.shutdown().await;
                Err(e.into())
            }
        }
    }

    fn current(&self) -> &GrayFrame {
        &self.frame
    }

    async fn rewind(&mut self) -> MediaResult<()> {
        self.shutdown().await;
        self.next_index = 0;
        self.exhausted = false;
        Ok(())
    }
}

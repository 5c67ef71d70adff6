//! One-time export of every decoded frame to JPEG.

use std::path::Path;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// JPEG quality scale used for extracted frames.
pub const FRAME_JPEG_QUALITY: u8 = 10;

/// Build the export command writing `frames_dir/000000.jpg`, `000001.jpg`, ...
pub fn extract_command(video: &Path, frames_dir: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video, frames_dir.join("%06d.jpg"))
        .jpeg_quality(FRAME_JPEG_QUALITY)
        .output_args(["-start_number", "0", "-fps_mode", "passthrough"])
}

/// Export every frame of `video` into `frames_dir`.
///
/// Returns the number of frames on disk afterwards.
pub async fn extract_frames<F>(
    runner: &FfmpegRunner,
    video: impl AsRef<Path>,
    frames_dir: impl AsRef<Path>,
    on_progress: F,
) -> MediaResult<u64>
where
    F: Fn(FfmpegProgress) + Send + 'static,
{
    let video = video.as_ref();
    let frames_dir = frames_dir.as_ref();

    if !video.exists() {
        return Err(MediaError::FileNotFound(video.to_path_buf()));
    }
    tokio::fs::create_dir_all(frames_dir).await?;

    let cmd = extract_command(video, frames_dir);
    runner.run_with_progress(&cmd, on_progress).await?;

    let count = count_frames(frames_dir).await?;
    if count == 0 {
        return Err(MediaError::InvalidVideo(format!(
            "no frames extracted from {}",
            video.display()
        )));
    }

    info!(
        video = %video.display(),
        frames = count,
        dir = %frames_dir.display(),
        "Frames extracted"
    );
    Ok(count)
}

/// Count extracted `.jpg` frames in a directory.
pub async fn count_frames(frames_dir: impl AsRef<Path>) -> MediaResult<u64> {
    let mut count = 0u64;
    let mut entries = tokio::fs::read_dir(frames_dir.as_ref()).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.path().extension().is_some_and(|ext| ext == "jpg") {
            count += 1;
        }
    }
    Ok(count)
}

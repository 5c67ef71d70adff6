//! Filesystem utilities for staging frames and persisting artifacts.
//!
//! Frame working sets and merged results reference existing files instead
//! of copying them. Hard links fail with EXDEV when the source lives on a
//! different filesystem; in that case the file is copied instead.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Hard-link `src` to `dst`, copying when they are on different devices.
///
/// The parent directory of `dst` is created if needed.
pub async fn link_or_copy(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.exists() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::hard_link(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device link detected, falling back to copy: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_atomic(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Reference `src` from `dst` without copying its contents.
///
/// Uses a symlink on unix so the merged index points back at the chunk
/// that produced the artifact; other platforms get a hard link.
pub async fn link_artifact(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    #[cfg(unix)]
    {
        let target = fs::canonicalize(src).await?;
        fs::symlink(target, dst).await?;
    }
    #[cfg(not(unix))]
    {
        fs::hard_link(src, dst).await?;
    }

    Ok(())
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

/// Copy via a temp file in the destination directory, then rename.
async fn copy_atomic(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Failed to copy {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        MediaError::from(e)
    })?;

    fs::rename(&tmp_dst, dst).await.map_err(|e| {
        let _ = std::fs::remove_file(&tmp_dst);
        MediaError::from(e)
    })?;

    Ok(())
}

/// Serialize `value` as pretty JSON, written atomically.
pub async fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> MediaResult<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read and deserialize a JSON file.
pub async fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> MediaResult<T> {
    let path = path.as_ref();
    let bytes = fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MediaError::FileNotFound(path.to_path_buf())
        } else {
            MediaError::from(e)
        }
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_link_or_copy_creates_parent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("000005.jpg");
        let dst = dir.path().join("chunk_0").join("frames").join("000005.jpg");

        fs::write(&src, b"jpeg").await.unwrap();
        link_or_copy(&src, &dst).await.unwrap();

        assert!(src.exists(), "Source must be kept");
        assert_eq!(fs::read(&dst).await.unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_link_or_copy_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = link_or_copy(dir.path().join("nope.jpg"), dir.path().join("out.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_link_artifact_refuses_existing() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.json");
        let dst = dir.path().join("results").join("a.json");
        fs::write(&src, b"{}").await.unwrap();

        link_artifact(&src, &dst).await.unwrap();
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "{}");
        assert!(link_artifact(&src, &dst).await.is_err());
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("value.json");

        write_json(&path, &vec![1u32, 2, 3]).await.unwrap();
        let back: Vec<u32> = read_json(&path).await.unwrap();
        assert_eq!(back, vec![1, 2, 3]);

        let missing: MediaResult<Vec<u32>> = read_json(dir.path().join("missing.json")).await;
        assert!(matches!(missing, Err(MediaError::FileNotFound(_))));
    }

    #[test]
    fn test_is_cross_device_error() {
        let exdev_error = std::io::Error::from_raw_os_error(18);
        assert!(is_cross_device_error(&exdev_error));

        let not_found = std::io::Error::from_raw_os_error(2);
        assert!(!is_cross_device_error(&not_found));
    }
}

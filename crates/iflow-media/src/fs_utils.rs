//! Filesystem helpers for output files.
//!
//! Encoders write to a hidden partial file next to the requested output and
//! move it into place only once the stream is complete, so a failed job never
//! leaves a truncated video at the output path.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Path of the in-progress file for `output`: `.<stem>.partial.<ext>` in the
/// same directory.
///
/// The extension is kept so FFmpeg still picks the right muxer.
pub fn partial_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    let name = match output.extension() {
        Some(ext) => format!(".{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!(".{}.partial", stem),
    };

    match output.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> MediaResult<()> {
    match fs::remove_file(path.as_ref()).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Move `src` onto `dst`, replacing it.
///
/// Falls back to copy and delete when a rename crosses filesystems (EXDEV),
/// staging the copy next to `dst` so the final step is still a rename.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());

    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "{} and {} are on different filesystems, copying",
                src.display(),
                dst.display()
            );
            copy_across(src, dst).await
        }
        Err(e) => Err(e.into()),
    }
}

/// EXDEV on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_across(src: &Path, dst: &Path) -> MediaResult<()> {
    let staged = partial_path_for(dst).with_extension("copy");

    if let Err(e) = fs::copy(src, &staged).await {
        let _ = remove_if_exists(&staged).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&staged, dst).await {
        let _ = remove_if_exists(&staged).await;
        return Err(e.into());
    }

    if let Err(e) = remove_if_exists(src).await {
        warn!("Moved {} but could not remove it: {}", src.display(), e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_replaces_existing_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("clip.mp4");
        let partial = partial_path_for(&output);

        fs::write(&output, b"stale").await.unwrap();
        fs::write(&partial, b"fresh").await.unwrap();

        move_file(&partial, &output).await.unwrap();

        assert!(!partial.exists());
        assert_eq!(fs::read(&output).await.unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_move_file_creates_parent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("nested").join("deeper").join("b.bin");

        fs::write(&src, b"x").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(dst.exists());
        assert!(!src.exists());
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let result = move_file(dir.path().join("nope"), dir.path().join("out")).await;
        assert!(matches!(result, Err(MediaError::Io(_))));
    }

    #[test]
    fn test_partial_path_for() {
        assert_eq!(
            partial_path_for(Path::new("/data/out/clip.mp4")),
            PathBuf::from("/data/out/.clip.partial.mp4")
        );
        assert_eq!(
            partial_path_for(Path::new("clip")),
            PathBuf::from(".clip.partial")
        );
    }

    #[tokio::test]
    async fn test_remove_if_exists_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.mp4");

        fs::write(&path, b"x").await.unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
        remove_if_exists(&path).await.unwrap();
    }

    #[test]
    fn test_cross_device_detection() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}

//! Local path sources
//!
//! A path dependency is keyed by the content hash of its directory and
//! fetched by copying it into the staging area.

use std::path::Path;

use crate::core::fetch::{FetchCause, FetchedSource};
use crate::infra::filesystem::{self, AbandonFlag};

fn ensure_dir(path: &Path) -> Result<(), FetchCause> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(FetchCause::Io(format!(
            "path dependency '{}' is not a directory",
            path.display()
        )))
    }
}

/// Content hash of a path dependency, computed on a blocking thread
pub async fn content_hash(path: &Path) -> Result<String, FetchCause> {
    ensure_dir(path)?;
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || filesystem::hash_directory(&path))
        .await
        .map_err(|e| FetchCause::Io(format!("hash task failed: {e}")))?
        .map_err(|e| FetchCause::Io(e.to_string()))
}

/// Copy a path dependency into `dest`
///
/// `content_hash` is the hash the cache key was computed from; it becomes the
/// resolved version.
pub async fn copy_source(
    src: &Path,
    dest: &Path,
    content_hash: &str,
) -> Result<FetchedSource, FetchCause> {
    ensure_dir(src)?;
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    let scratch = filesystem::scratch_path(&dest, "copy");

    tracing::debug!(from = %src.display(), to = %dest.display(), "Copying path dependency");

    let flag = AbandonFlag::new();
    let _guard = flag.guard();
    let published = tokio::task::spawn_blocking(move || {
        if let Err(e) = filesystem::copy_dir_all(&src, &scratch) {
            if let Err(rm) = filesystem::remove_dir_all(&scratch) {
                tracing::warn!(path = %scratch.display(), error = %rm, "Failed to remove partial copy");
            }
            return Err(e);
        }
        flag.publish(&scratch, &dest)
    })
    .await
    .map_err(|e| FetchCause::Io(format!("copy task failed: {e}")))?
    .map_err(|e| FetchCause::Io(e.to_string()))?;

    if !published {
        return Err(FetchCause::Cancelled);
    }
    Ok(FetchedSource {
        resolved_version: content_hash.to_string(),
    })
}

//! Filesystem operations
//!
//! Handles file and directory operations.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a directory and all its contents
pub fn remove_dir_all(path: &Path) -> Result<(), FilesystemError> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| FilesystemError::RemoveDir {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    Ok(())
}

/// Write content to a file through a sibling temporary file and a rename
///
/// Readers see either the old content or the new content, never a prefix.
pub fn write_file_atomic(path: &Path, content: &[u8]) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, content).map_err(|e| FilesystemError::WriteFile {
        path: tmp.clone(),
        error: e.to_string(),
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        FilesystemError::WriteFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        }
    })
}

/// Read content from a file
pub fn read_file(path: &Path) -> Result<String, FilesystemError> {
    std::fs::read_to_string(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Recursively copy `src` into `dest`, creating `dest`
///
/// Symlinks are copied as the files they point to.
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<(), FilesystemError> {
    create_dir_all(dest)?;

    for entry in walkdir::WalkDir::new(src).follow_links(true).min_depth(1) {
        let entry = entry.map_err(|e| FilesystemError::ReadFile {
            path: src.to_path_buf(),
            error: e.to_string(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| FilesystemError::ReadFile {
                path: entry.path().to_path_buf(),
                error: e.to_string(),
            })?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| FilesystemError::WriteFile {
                path: target.clone(),
                error: e.to_string(),
            })?;
        }
    }
    Ok(())
}

/// SHA256 over the sorted relative paths and contents of every file under `root`
///
/// Two trees with the same files and contents hash equally regardless of
/// timestamps or the order the filesystem lists them in.
pub fn hash_directory(root: &Path) -> Result<String, FilesystemError> {
    let mut hasher = Sha256::new();

    let walker = walkdir::WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .min_depth(1);

    for entry in walker {
        let entry = entry.map_err(|e| FilesystemError::ReadFile {
            path: root.to_path_buf(),
            error: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let content = std::fs::read(entry.path()).map_err(|e| FilesystemError::ReadFile {
            path: entry.path().to_path_buf(),
            error: e.to_string(),
        })?;

        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update([0]);
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Sibling of `dest` used to assemble a tree before it is moved into place
pub fn scratch_path(dest: &Path, suffix: &str) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{suffix}"));
    dest.with_file_name(name)
}

/// Hand-off between an async fetch and the blocking worker filling its tree
///
/// The worker builds into a scratch directory and calls [`publish`] at the
/// end. Once the [`AbandonGuard`] held by the async side has been dropped,
/// `publish` discards the scratch tree instead, so a cancelled fetch leaves
/// nothing behind in the staging area.
///
/// [`publish`]: AbandonFlag::publish
#[derive(Debug, Clone, Default)]
pub struct AbandonFlag(Arc<Mutex<bool>>);

impl AbandonFlag {
    /// Create a flag that is not yet abandoned
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard marking the flag abandoned when dropped
    pub fn guard(&self) -> AbandonGuard {
        AbandonGuard(self.clone())
    }

    fn mark_abandoned(&self) {
        if let Ok(mut abandoned) = self.0.lock() {
            *abandoned = true;
        }
    }

    /// Move `scratch` to `dest`, or remove it if the fetch was abandoned
    ///
    /// Returns whether the tree was moved into place.
    pub fn publish(&self, scratch: &Path, dest: &Path) -> Result<bool, FilesystemError> {
        // Held across the rename so the guard cannot drop in between
        let state = self.0.lock();
        let abandoned = state.as_ref().map_or(true, |state| **state);

        if abandoned {
            remove_dir_all(scratch)?;
            return Ok(false);
        }

        std::fs::rename(scratch, dest).map_err(|e| FilesystemError::WriteFile {
            path: dest.to_path_buf(),
            error: e.to_string(),
        })?;
        Ok(true)
    }
}

/// Marks its [`AbandonFlag`] abandoned on drop
#[derive(Debug)]
pub struct AbandonGuard(AbandonFlag);

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        self.0.mark_abandoned();
    }
}

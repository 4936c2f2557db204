//! Project discovery and loading
//!
//! A project is a directory containing `raft.toml`. Loading is read-only and
//! happens once per invocation; the resulting [`Project`] is immutable.

use std::path::{Path, PathBuf};

use crate::config::defaults::{LOCK_FILE, MANIFEST_FILE, METADATA_DIR};
use crate::core::lock::LockFile;
use crate::core::manifest::{BuildRule, HooksConfig, Manifest, RawDependency};
use crate::error::RaftError;

/// A loaded project
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    metadata_dir: PathBuf,
    source_root: PathBuf,
    manifest: Manifest,
    dependencies: Vec<RawDependency>,
    lock: Option<LockFile>,
}

impl Project {
    /// Search upward from `start_dir` for a manifest and load it
    pub fn find(start_dir: &Path) -> Result<Self, RaftError> {
        let mut current = Some(start_dir);
        while let Some(dir) = current {
            if dir.join(MANIFEST_FILE).is_file() {
                tracing::debug!("Found project manifest in {}", dir.display());
                return Self::load(dir);
            }
            current = dir.parent();
        }

        Err(RaftError::ProjectNotFound {
            start: start_dir.to_path_buf(),
        })
    }

    /// Load the project whose manifest lives directly in `root`
    pub fn load(root: &Path) -> Result<Self, RaftError> {
        let manifest_path = root.join(MANIFEST_FILE);
        let content =
            std::fs::read_to_string(&manifest_path).map_err(|e| RaftError::Manifest {
                path: manifest_path.clone(),
                error: e.to_string(),
            })?;
        let manifest = Manifest::from_toml(&content).map_err(|error| RaftError::Manifest {
            path: manifest_path.clone(),
            error,
        })?;

        let unknown = manifest.build.unknown_platforms();
        if !unknown.is_empty() {
            return Err(RaftError::Manifest {
                path: manifest_path,
                error: format!("unknown platform in [build.platforms]: {}", unknown.join(", ")),
            });
        }

        let dependencies = manifest.raw_dependencies()?;

        let lock_path = root.join(LOCK_FILE);
        let lock = if lock_path.is_file() {
            Some(LockFile::load(&lock_path)?)
        } else {
            None
        };

        Ok(Self {
            root: root.to_path_buf(),
            metadata_dir: root.join(METADATA_DIR),
            source_root: root.to_path_buf(),
            manifest,
            dependencies,
            lock,
        })
    }

    /// Project name from the manifest
    pub fn name(&self) -> &str {
        &self.manifest.project.name
    }

    /// Project root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Metadata directory (`<root>/.raft`)
    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    /// Resolve relative `path` dependencies against `source_root`
    ///
    /// Used for a project loaded from a copy of its sources, whose
    /// relative paths still point at siblings of the original directory.
    #[must_use]
    pub fn with_source_root(mut self, source_root: &Path) -> Self {
        self.source_root = source_root.to_path_buf();
        self
    }

    /// Directory relative `path` dependencies resolve against
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Raw dependency entries in declaration order
    pub fn dependencies(&self) -> &[RawDependency] {
        &self.dependencies
    }

    /// Build rule
    pub fn build_rule(&self) -> &BuildRule {
        &self.manifest.build
    }

    /// Hook declarations
    pub fn hooks(&self) -> &HooksConfig {
        &self.manifest.hooks
    }

    /// Lock file loaded alongside the manifest, if present
    pub fn lock(&self) -> Option<&LockFile> {
        self.lock.as_ref()
    }

    /// Path of the lock file
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}

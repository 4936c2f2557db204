//! Lock file handling
//!
//! The lock file (raft.lock) pins registry version ranges to exact versions
//! and records what every dependency resolved to on the last build.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::fetch::ResolvedDependency;
use crate::error::RaftError;
use crate::infra::filesystem;

/// Current lock file format version
pub const LOCK_FORMAT_VERSION: u32 = 1;

/// Lock file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockFile {
    /// Lock file format version
    pub version: u32,

    /// Locked dependencies, keyed by name
    #[serde(default)]
    pub dependencies: BTreeMap<String, LockedDependency>,
}

/// A locked dependency entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedDependency {
    /// Source description (`git+<url>`, `registry+<url>`, `path+<dir>`)
    pub source: String,

    /// Version the source was pinned at (tag, branch, rev, version, or content hash)
    pub version: String,

    /// What the source resolved to (commit SHA, exact version, content hash)
    pub resolved: String,
}

impl LockFile {
    /// Create an empty lock file
    pub fn new() -> Self {
        Self {
            version: LOCK_FORMAT_VERSION,
            dependencies: BTreeMap::new(),
        }
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self, RaftError> {
        let lock: Self = toml::from_str(content).map_err(|e| RaftError::Lock(e.to_string()))?;
        if lock.version != LOCK_FORMAT_VERSION {
            return Err(RaftError::Lock(format!(
                "unsupported lock file version {} (expected {LOCK_FORMAT_VERSION})",
                lock.version
            )));
        }
        Ok(lock)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String, RaftError> {
        toml::to_string_pretty(self).map_err(|e| RaftError::Lock(e.to_string()))
    }

    /// Read a lock file from disk
    pub fn load(path: &Path) -> Result<Self, RaftError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RaftError::Lock(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Write the lock file atomically
    pub fn save(&self, path: &Path) -> Result<(), RaftError> {
        let content = self.to_toml()?;
        filesystem::write_file_atomic(path, content.as_bytes())?;
        Ok(())
    }

    /// Add or replace a locked dependency
    pub fn insert(&mut self, name: &str, locked: LockedDependency) {
        self.dependencies.insert(name.to_string(), locked);
    }

    /// Look up a locked dependency
    pub fn get(&self, name: &str) -> Option<&LockedDependency> {
        self.dependencies.get(name)
    }

    /// Exact version pinned for a registry range, if the recorded pin satisfies it
    pub fn pin_for(&self, name: &str, req: &semver::VersionReq) -> Option<semver::Version> {
        let locked = self.dependencies.get(name)?;
        let version = semver::Version::parse(&locked.resolved).ok()?;
        req.matches(&version).then_some(version)
    }

    /// Build a lock file from the dependencies of a finished build
    pub fn from_resolved(resolved: &[ResolvedDependency]) -> Self {
        let mut lock = Self::new();
        for dep in resolved {
            lock.insert(
                &dep.spec.name,
                LockedDependency {
                    source: dep.spec.source_description(),
                    version: dep.spec.pinned_version_label(),
                    resolved: dep.resolved_version.clone(),
                },
            );
        }
        lock
    }
}

impl Default for LockFile {
    fn default() -> Self {
        Self::new()
    }
}

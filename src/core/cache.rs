//! Dependency cache
//!
//! Content-addressed store of fetched dependencies, partitioned by platform
//! and architecture:
//!
//! ```text
//! <root>/<platform>/<arch>/<name>/<version>-<key prefix>/artifact/
//! <root>/<platform>/<arch>/<name>/<version>-<key prefix>/entry.json
//! <root>/.staging/<in-progress fetches>
//! ```
//!
//! The artifact is moved into place before `entry.json` is written, and
//! `entry.json` is itself written through a rename, so an entry is either
//! fully committed or invisible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::core::build_config::{Architecture, BuildSettings, Platform};
use crate::core::dependency::DependencySpec;
use crate::error::FilesystemError;
use crate::infra::filesystem;

const ENTRY_FILE: &str = "entry.json";
const ARTIFACT_DIR: &str = "artifact";
const STAGING_DIR: &str = ".staging";

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem failure
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    /// Entry record could not be serialized
    #[error("Failed to serialize cache entry for '{name}': {error}")]
    Serialize { name: String, error: String },

    /// Background task failed
    #[error("Cache task failed: {0}")]
    Task(String),
}

/// Cache information
#[derive(Debug)]
pub struct CacheInfo {
    /// Cache directory path
    pub path: PathBuf,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Number of committed entries
    pub item_count: usize,
    /// Whether cache exists
    pub exists: bool,
}

impl CacheInfo {
    /// Format size for display
    pub fn format_size(&self) -> String {
        format_size(self.size_bytes)
    }
}

/// Human-readable byte count
#[allow(clippy::cast_precision_loss)]
pub fn format_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        "0 bytes".to_string()
    } else if size_bytes < 1024 {
        format!("{size_bytes} bytes")
    } else if size_bytes < 1024 * 1024 {
        format!("{:.1} KB", size_bytes as f64 / 1024.0)
    } else if size_bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", size_bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", size_bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Key of a resolved dependency: source identity, platform, architecture, version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Dependency name
    pub name: String,
    /// Source identity
    pub identity: String,
    /// Target settings
    pub settings: BuildSettings,
    /// Pinned version (ref, exact version, or content hash)
    pub version: String,
}

impl CacheKey {
    /// Key for a spec built for `settings` at `version`
    pub fn new(spec: &DependencySpec, settings: BuildSettings, version: &str) -> Self {
        Self {
            name: spec.name.clone(),
            identity: spec.identity(),
            settings,
            version: version.to_string(),
        }
    }

    /// Hex digest of the key
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.name.as_str(),
            self.identity.as_str(),
            self.settings.platform().as_str(),
            self.settings.architecture().as_str(),
            self.version.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0]);
        }

        let result = hasher.finalize();
        hex::encode(&result[..16]) // First 16 bytes for a shorter key
    }

    /// Entry directory relative to the cache root
    pub fn relative_dir(&self) -> PathBuf {
        let version: String = self
            .version
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .take(40)
            .collect();
        let digest = self.digest();

        self.settings
            .partition()
            .join(&self.name)
            .join(format!("{version}-{}", &digest[..8]))
    }
}

/// Committed cache entry, stored as `entry.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key digest
    pub key: String,
    /// Dependency name
    pub name: String,
    /// Source identity
    pub identity: String,
    /// Source description
    pub source: String,
    /// Platform the entry was built for
    pub platform: Platform,
    /// Architecture the entry was built for
    pub architecture: Architecture,
    /// Pinned version the key was computed from
    pub version: String,
    /// What the source resolved to
    pub resolved_version: String,
    /// SHA256 over the artifact tree
    pub checksum: String,
    /// Artifact directory
    pub install_path: PathBuf,
    /// Commit time
    pub fetched_at: DateTime<Utc>,
}

/// On-disk dependency cache
#[derive(Debug, Clone)]
pub struct FetchCache {
    root: PathBuf,
}

impl FetchCache {
    /// Cache rooted at `root`
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Cache root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry directory for a key
    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_dir())
    }

    /// Fresh, not yet existing staging path for a fetch of `name`
    pub fn staging_dir(&self, name: &str) -> Result<PathBuf, CacheError> {
        let staging = self.root.join(STAGING_DIR);
        filesystem::create_dir_all(&staging)?;

        let counter = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        Ok(staging.join(format!("{name}-{}-{counter}", std::process::id())))
    }

    /// Look up a committed entry with a valid checksum
    ///
    /// An entry whose artifact no longer matches its checksum is removed and
    /// reported as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let entry_dir = self.entry_dir(key);
        let digest = key.digest();

        tokio::task::spawn_blocking(move || lookup_blocking(&entry_dir, &digest))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))?
    }

    /// Move a staged tree into the cache and write its entry
    pub async fn commit(
        &self,
        key: &CacheKey,
        staged: &Path,
        resolved_version: &str,
        source: &str,
    ) -> Result<CacheEntry, CacheError> {
        let entry_dir = self.entry_dir(key);
        let key = key.clone();
        let staged = staged.to_path_buf();
        let resolved_version = resolved_version.to_string();
        let source = source.to_string();

        tokio::task::spawn_blocking(move || {
            commit_blocking(&entry_dir, &key, &staged, &resolved_version, &source)
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
    }

    /// Size and entry count of the cache
    pub fn info(&self) -> CacheInfo {
        let exists = self.root.exists();
        let size_bytes = calculate_dir_size(&self.root);
        let item_count = if exists {
            walkdir::WalkDir::new(&self.root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file() && e.file_name() == ENTRY_FILE)
                .count()
        } else {
            0
        };

        CacheInfo {
            path: self.root.clone(),
            size_bytes,
            item_count,
            exists,
        }
    }

    /// Remove the whole cache, returning the bytes freed
    pub fn clean(&self) -> Result<u64, CacheError> {
        if !self.root.exists() {
            return Ok(0);
        }

        let size_before = calculate_dir_size(&self.root);
        filesystem::remove_dir_all(&self.root)?;
        Ok(size_before)
    }

    /// Remove leftover staging directories, returning the bytes freed
    pub fn clean_staging(&self) -> Result<u64, CacheError> {
        let staging = self.root.join(STAGING_DIR);
        let size_before = calculate_dir_size(&staging);
        filesystem::remove_dir_all(&staging)?;
        Ok(size_before)
    }
}

fn lookup_blocking(entry_dir: &Path, digest: &str) -> Result<Option<CacheEntry>, CacheError> {
    let entry_path = entry_dir.join(ENTRY_FILE);
    if !entry_path.is_file() {
        return Ok(None);
    }

    let content = filesystem::read_file(&entry_path)?;
    let entry: CacheEntry = match serde_json::from_str(&content) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(path = %entry_path.display(), error = %e, "Discarding unreadable cache entry");
            filesystem::remove_dir_all(entry_dir)?;
            return Ok(None);
        }
    };

    if entry.key != digest {
        return Ok(None);
    }

    let valid = entry.install_path.is_dir()
        && filesystem::hash_directory(&entry.install_path)
            .is_ok_and(|checksum| checksum == entry.checksum);
    if !valid {
        tracing::warn!(dependency = %entry.name, path = %entry_dir.display(), "Cache entry failed verification, refetching");
        filesystem::remove_dir_all(entry_dir)?;
        return Ok(None);
    }

    Ok(Some(entry))
}

fn commit_blocking(
    entry_dir: &Path,
    key: &CacheKey,
    staged: &Path,
    resolved_version: &str,
    source: &str,
) -> Result<CacheEntry, CacheError> {
    let digest = key.digest();

    // Another process may have committed the same key meanwhile
    if let Some(existing) = lookup_blocking(entry_dir, &digest)? {
        filesystem::remove_dir_all(staged)?;
        return Ok(existing);
    }

    let checksum = filesystem::hash_directory(staged)?;
    let install_path = entry_dir.join(ARTIFACT_DIR);

    // Leftover artifact from an interrupted commit
    filesystem::remove_dir_all(entry_dir)?;
    filesystem::create_dir_all(entry_dir)?;
    std::fs::rename(staged, &install_path).map_err(|e| FilesystemError::WriteFile {
        path: install_path.clone(),
        error: e.to_string(),
    })?;

    let entry = CacheEntry {
        key: digest,
        name: key.name.clone(),
        identity: key.identity.clone(),
        source: source.to_string(),
        platform: key.settings.platform(),
        architecture: key.settings.architecture(),
        version: key.version.clone(),
        resolved_version: resolved_version.to_string(),
        checksum,
        install_path,
        fetched_at: Utc::now(),
    };

    let json = serde_json::to_string_pretty(&entry).map_err(|e| CacheError::Serialize {
        name: key.name.clone(),
        error: e.to_string(),
    })?;
    filesystem::write_file_atomic(&entry_dir.join(ENTRY_FILE), json.as_bytes())?;

    tracing::debug!(dependency = %key.name, path = %entry_dir.display(), "Committed cache entry");
    Ok(entry)
}

/// Calculate directory size recursively
fn calculate_dir_size(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }

    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dependency::Source;
    use crate::infra::git::GitRef;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn spec(name: &str) -> DependencySpec {
        DependencySpec {
            name: name.to_string(),
            source: Source::Vcs {
                url: format!("https://example.com/{name}.git"),
                reference: GitRef::Tag("v1.0".to_string()),
            },
        }
    }

    fn linux_x64() -> BuildSettings {
        BuildSettings::new(Platform::Linux, Architecture::X64)
    }

    fn stage(cache: &FetchCache, name: &str, content: &str) -> PathBuf {
        let staged = cache.staging_dir(name).unwrap();
        std::fs::create_dir_all(&staged).unwrap();
        std::fs::write(staged.join("lib.txt"), content).unwrap();
        staged
    }

    #[test]
    fn test_cache_info_format_size() {
        let mut info = CacheInfo {
            path: PathBuf::from("/tmp/cache"),
            size_bytes: 0,
            item_count: 0,
            exists: false,
        };
        assert_eq!(info.format_size(), "0 bytes");

        info.size_bytes = 512;
        assert_eq!(info.format_size(), "512 bytes");

        info.size_bytes = 1024 * 100;
        assert!(info.format_size().contains("KB"));

        info.size_bytes = 1024 * 1024 * 50;
        assert!(info.format_size().contains("MB"));
    }

    #[test]
    fn test_key_partitions_by_architecture() {
        let x64 = CacheKey::new(&spec("a"), linux_x64(), "v1.0");
        let arm = CacheKey::new(
            &spec("a"),
            BuildSettings::new(Platform::Linux, Architecture::Arm64),
            "v1.0",
        );

        assert_ne!(x64.digest(), arm.digest());
        assert!(x64.relative_dir().starts_with("linux/x64/a"));
        assert!(arm.relative_dir().starts_with("linux/arm64/a"));
    }

    #[test]
    fn test_relative_dir_sanitizes_version() {
        let key = CacheKey::new(&spec("a"), linux_x64(), "feature/x y");
        let leaf = key.relative_dir().file_name().unwrap().to_string_lossy().into_owned();
        assert!(leaf.starts_with("feature_x_y-"));
    }

    #[tokio::test]
    async fn test_commit_then_lookup() {
        let temp = TempDir::new().unwrap();
        let cache = FetchCache::new(temp.path().to_path_buf());
        let key = CacheKey::new(&spec("a"), linux_x64(), "v1.0");

        assert!(cache.lookup(&key).await.unwrap().is_none());

        let staged = stage(&cache, "a", "content");
        let entry = cache
            .commit(&key, &staged, "0123abcd", "git+https://example.com/a.git")
            .await
            .unwrap();

        assert!(!staged.exists());
        assert_eq!(entry.install_path, cache.entry_dir(&key).join("artifact"));
        assert!(entry.install_path.join("lib.txt").is_file());

        let found = cache.lookup(&key).await.unwrap().unwrap();
        assert_eq!(found, entry);
        assert_eq!(found.resolved_version, "0123abcd");
    }

    #[tokio::test]
    async fn test_tampered_entry_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = FetchCache::new(temp.path().to_path_buf());
        let key = CacheKey::new(&spec("a"), linux_x64(), "v1.0");

        let staged = stage(&cache, "a", "content");
        let entry = cache.commit(&key, &staged, "sha", "src").await.unwrap();
        std::fs::write(entry.install_path.join("lib.txt"), "tampered").unwrap();

        assert!(cache.lookup(&key).await.unwrap().is_none());
        assert!(!cache.entry_dir(&key).exists());
    }

    #[tokio::test]
    async fn test_commit_keeps_existing_entry() {
        let temp = TempDir::new().unwrap();
        let cache = FetchCache::new(temp.path().to_path_buf());
        let key = CacheKey::new(&spec("a"), linux_x64(), "v1.0");

        let first = cache
            .commit(&key, &stage(&cache, "a", "one"), "sha1", "src")
            .await
            .unwrap();
        let second_staged = stage(&cache, "a", "two");
        let second = cache.commit(&key, &second_staged, "sha2", "src").await.unwrap();

        assert_eq!(first, second);
        assert!(!second_staged.exists());
    }

    #[tokio::test]
    async fn test_info_and_clean() {
        let temp = TempDir::new().unwrap();
        let cache = FetchCache::new(temp.path().join("deps"));
        assert_eq!(cache.info().item_count, 0);
        assert!(!cache.info().exists);

        let key = CacheKey::new(&spec("a"), linux_x64(), "v1.0");
        cache
            .commit(&key, &stage(&cache, "a", "content"), "sha", "src")
            .await
            .unwrap();
        let leftover = stage(&cache, "b", "partial");

        let info = cache.info();
        assert_eq!(info.item_count, 1);
        assert!(info.size_bytes > 0);

        assert!(cache.clean_staging().unwrap() > 0);
        assert!(!leftover.exists());
        assert_eq!(cache.info().item_count, 1);

        assert!(cache.clean().unwrap() > 0);
        assert!(!cache.root().exists());
    }

    #[test]
    fn test_staging_dirs_are_unique() {
        let temp = TempDir::new().unwrap();
        let cache = FetchCache::new(temp.path().to_path_buf());
        let a = cache.staging_dir("a").unwrap();
        let b = cache.staging_dir("a").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(temp.path().join(".staging")));
    }

    proptest! {
        #[test]
        fn prop_digest_is_deterministic(name in "[a-z][a-z0-9_-]{0,20}", version in "[a-zA-Z0-9./-]{1,30}") {
            let one = CacheKey::new(&spec(&name), linux_x64(), &version);
            let two = CacheKey::new(&spec(&name), linux_x64(), &version);
            prop_assert_eq!(one.digest(), two.digest());
            prop_assert_eq!(one.relative_dir(), two.relative_dir());
            prop_assert_eq!(one.digest().len(), 32);
        }
    }
}

//! Error types for raft
//!
//! Domain-specific error types using thiserror. Every failure category of a
//! build maps to exactly one [`RaftError`] variant and one process exit code.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::cache::CacheError;
use crate::core::fetch::FetchError;
use crate::core::global_config::GlobalConfigError;
use crate::core::hooks::HookError;

/// Build configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Platform outside the supported set, or not inferable from the host
    #[error("Unsupported platform '{value}' (supported: {supported})")]
    UnsupportedPlatform { value: String, supported: String },

    /// Architecture outside the supported set, or not inferable from the host
    #[error("Unsupported architecture '{value}' (supported: {supported})")]
    UnsupportedArchitecture { value: String, supported: String },

    /// Invalid numeric or structural option
    #[error("Invalid option '{name}': {reason}")]
    InvalidOption { name: String, reason: String },
}

/// Dependency spec validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencySpecError {
    /// Dependency name is empty or contains invalid characters
    #[error("Invalid dependency name '{name}'")]
    InvalidName { name: String },

    /// Entry is not a table or version string
    #[error("Dependency '{name}' is malformed: {error}")]
    Malformed { name: String, error: String },

    /// No source type specified
    #[error("Dependency '{name}' has no source (git, version, or path required)")]
    NoSource { name: String },

    /// Multiple source types specified
    #[error("Dependency '{name}' specifies multiple sources: {}", sources.join(", "))]
    ConflictingSources { name: String, sources: Vec<String> },

    /// Git source without ref
    #[error("Dependency '{name}' specifies a git source without tag, branch, or rev")]
    GitWithoutRef { name: String },

    /// Git source with more than one ref
    #[error("Dependency '{name}' specifies more than one of tag, branch, rev")]
    AmbiguousGitRef { name: String },

    /// Field only valid for another source kind
    #[error("Dependency '{name}' sets '{field}', which is not valid for a {kind} source")]
    UnexpectedField {
        name: String,
        field: String,
        kind: String,
    },

    /// Version constraint does not parse
    #[error("Dependency '{name}' has invalid version constraint '{constraint}': {error}")]
    InvalidVersion {
        name: String,
        constraint: String,
        error: String,
    },

    /// Registry range with no pin in the lock file
    #[error("Dependency '{name}' constraint '{constraint}' is not pinned; use an exact version or record it in raft.lock")]
    Unpinned { name: String, constraint: String },

    /// Name declared twice
    #[error("Dependency '{name}' is declared more than once")]
    Duplicate { name: String },
}

/// Build errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Build command exited unsuccessfully
    #[error("Build of '{project}' failed ({status}): {diagnostic}")]
    BuildFailed {
        project: String,
        status: String,
        diagnostic: String,
    },

    /// Build command could not be started
    #[error("Failed to start build command '{command}' for '{project}': {error}")]
    SpawnFailed {
        project: String,
        command: String,
        error: String,
    },

    /// Build environment is inconsistent
    #[error("Invalid build environment: {0}")]
    Environment(String),
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },
}

/// Download errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network error
    #[error("Network error downloading '{url}': {error}")]
    NetworkError { url: String, error: String },

    /// Server rejected credentials
    #[error("Authentication failed downloading '{url}': HTTP {status}")]
    Unauthorized { url: String, status: u16 },

    /// Checksum verification failed
    #[error("Checksum mismatch for '{file}': expected {expected}, got {actual}")]
    ChecksumFailed {
        file: String,
        expected: String,
        actual: String,
    },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Max retries exceeded
    #[error("Download failed after {retries} retries: {url}")]
    MaxRetriesExceeded { url: String, retries: u32 },
}

/// Top-level raft error type
#[derive(Error, Debug)]
pub enum RaftError {
    /// Build configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No manifest between the start directory and the filesystem root
    #[error("No raft.toml found in '{}' or any parent directory", start.display())]
    ProjectNotFound { start: PathBuf },

    /// Manifest could not be read or parsed
    #[error("Failed to load manifest '{}': {error}", path.display())]
    Manifest { path: PathBuf, error: String },

    /// Dependency spec validation error
    #[error("Invalid dependency spec: {0}")]
    InvalidDependencySpec(#[from] DependencySpecError),

    /// Dependency fetch error
    #[error("Dependency fetch failed: {0}")]
    DependencyFetch(#[from] FetchError),

    /// Hook error
    #[error("Hook failed: {0}")]
    Hook(#[from] HookError),

    /// Build error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Build-level timeout elapsed
    #[error("Build timed out after {seconds}s")]
    BuildTimeout { seconds: u64 },

    /// Lock file error
    #[error("Lock file error: {0}")]
    Lock(String),

    /// Global configuration error
    #[error("Global config error: {0}")]
    GlobalConfig(#[from] GlobalConfigError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Dependency cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RaftError {
    /// Process exit code for this failure category
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::GlobalConfig(_) => 2,
            Self::ProjectNotFound { .. } => 3,
            Self::Manifest { .. } | Self::InvalidDependencySpec(_) | Self::Lock(_) => 4,
            Self::DependencyFetch(_) => 5,
            Self::Hook(_) => 6,
            Self::Build(_) => 7,
            Self::BuildTimeout { .. } => 8,
            Self::Filesystem(_) | Self::Cache(_) | Self::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetch::FetchCause;

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        let errors = [
            RaftError::Config(ConfigError::UnsupportedPlatform {
                value: "beos".to_string(),
                supported: "linux".to_string(),
            }),
            RaftError::ProjectNotFound {
                start: PathBuf::from("/tmp"),
            },
            RaftError::InvalidDependencySpec(DependencySpecError::NoSource {
                name: "a".to_string(),
            }),
            RaftError::DependencyFetch(FetchError::new("a", FetchCause::Cancelled)),
            RaftError::Hook(HookError {
                phase: "beforeBuild".to_string(),
                handler: "x".to_string(),
                message: "boom".to_string(),
            }),
            RaftError::Build(BuildError::Environment("bad".to_string())),
            RaftError::BuildTimeout { seconds: 5 },
        ];

        let mut codes: Vec<u8> = errors.iter().map(RaftError::exit_code).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_fetch_error_message_names_dependency() {
        let err = RaftError::DependencyFetch(FetchError::new(
            "libfoo",
            FetchCause::Network("connection refused".to_string()),
        ));
        let message = err.to_string();
        assert!(message.contains("libfoo"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_conflicting_sources_message() {
        let err = DependencySpecError::ConflictingSources {
            name: "a".to_string(),
            sources: vec!["git".to_string(), "path".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Dependency 'a' specifies multiple sources: git, path"
        );
    }
}

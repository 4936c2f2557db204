//! Git operations
//!
//! Handles cloning repositories and checking out refs using the gix crate.
//! [`GitVcsProvider`] exposes the clone as the engine's VCS provider.

use async_trait::async_trait;
use gix::remote::fetch::Shallow;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::fetch::{FetchCause, FetchedSource, VcsProvider};
use crate::infra::filesystem::{self, AbandonFlag};

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to clone repository
    #[error("Failed to clone '{url}': {error}")]
    CloneFailed { url: String, error: String },

    /// Failed to checkout ref
    #[error("Failed to checkout ref '{reference}' in '{repo}': {error}")]
    CheckoutFailed {
        repo: String,
        reference: String,
        error: String,
    },

    /// Ref not found
    #[error("Ref '{reference}' not found in repository '{repo}'")]
    RefNotFound { repo: String, reference: String },

    /// Failed to resolve HEAD to SHA
    #[error("Failed to resolve '{reference}' to SHA: {error}")]
    ResolveFailed { reference: String, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// Git reference type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GitRef {
    /// Git tag (e.g., "v1.0.0")
    Tag(String),
    /// Git branch (e.g., "main")
    Branch(String),
    /// Git commit SHA (e.g., "abc123...")
    Rev(String),
}

impl GitRef {
    /// Get the reference string
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tag(s) | Self::Branch(s) | Self::Rev(s) => s,
        }
    }
}

impl std::fmt::Display for GitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tag(s) => write!(f, "tag:{s}"),
            Self::Branch(s) => write!(f, "branch:{s}"),
            Self::Rev(s) => write!(f, "rev:{s}"),
        }
    }
}

/// Result of a git clone operation
#[derive(Debug, Clone)]
pub struct CloneResult {
    /// Path to the checked out tree
    pub path: PathBuf,
    /// Resolved commit SHA
    pub commit_sha: String,
    /// The ref that was checked out
    pub checked_out_ref: GitRef,
}

/// Git repository operations
#[derive(Debug, Default)]
pub struct GitOperations;

impl GitOperations {
    /// Create a new git operations handler
    pub fn new() -> Self {
        Self
    }

    /// Clone `url` into `dest` and check out `git_ref`
    ///
    /// Tags and branches are fetched shallowly. A rev needs the full history
    /// and is checked out with the system `git`, since gix has no detached
    /// worktree checkout. The `.git` directory is removed afterwards so
    /// `dest` holds only the source tree.
    pub fn clone_repo(
        &self,
        url: &str,
        git_ref: &GitRef,
        dest: &Path,
    ) -> Result<CloneResult, GitError> {
        if dest.exists() {
            std::fs::remove_dir_all(dest).map_err(|e| GitError::IoError {
                path: dest.to_path_buf(),
                error: e.to_string(),
            })?;
        }

        let repo = Self::clone_internal(url, dest, git_ref)?;

        if let GitRef::Rev(rev) = git_ref {
            Self::checkout_rev(dest, url, rev)?;
        }

        let commit_sha = Self::head_sha(&repo, git_ref)?;
        if let GitRef::Rev(rev) = git_ref {
            if !commit_sha.starts_with(&rev.to_lowercase()) {
                return Err(GitError::RefNotFound {
                    repo: url.to_string(),
                    reference: git_ref.to_string(),
                });
            }
        }

        let git_dir = dest.join(".git");
        std::fs::remove_dir_all(&git_dir).map_err(|e| GitError::IoError {
            path: git_dir,
            error: e.to_string(),
        })?;

        Ok(CloneResult {
            path: dest.to_path_buf(),
            commit_sha,
            checked_out_ref: git_ref.clone(),
        })
    }

    /// Internal clone implementation using gix
    fn clone_internal(
        url: &str,
        dest: &Path,
        git_ref: &GitRef,
    ) -> Result<gix::Repository, GitError> {
        let clone_failed = |e: &dyn std::fmt::Display| GitError::CloneFailed {
            url: url.to_string(),
            error: e.to_string(),
        };

        let mut prepare = gix::prepare_clone(url, dest).map_err(|e| clone_failed(&e))?;

        match git_ref {
            GitRef::Tag(name) | GitRef::Branch(name) => {
                prepare = prepare
                    .with_ref_name(Some(name.as_str()))
                    .map_err(|e| GitError::RefNotFound {
                        repo: url.to_string(),
                        reference: format!("{git_ref} ({e})"),
                    })?
                    .with_shallow(Shallow::DepthAtRemote(NonZeroU32::MIN));
            }
            GitRef::Rev(_) => {}
        }

        let (mut checkout, _outcome) = prepare
            .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
            .map_err(|e| clone_failed(&e))?;

        let (repo, _outcome) = checkout
            .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
            .map_err(|e| clone_failed(&e))?;

        Ok(repo)
    }

    fn checkout_rev(dest: &Path, url: &str, rev: &str) -> Result<(), GitError> {
        let checkout_failed = |error: String| GitError::CheckoutFailed {
            repo: url.to_string(),
            reference: format!("rev:{rev}"),
            error,
        };

        let git = which::which("git")
            .map_err(|e| checkout_failed(format!("system git is required for rev checkouts: {e}")))?;
        let output = std::process::Command::new(git)
            .arg("-C")
            .arg(dest)
            .args(["checkout", "--quiet", "--detach", rev])
            .output()
            .map_err(|e| checkout_failed(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(checkout_failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    fn head_sha(repo: &gix::Repository, git_ref: &GitRef) -> Result<String, GitError> {
        // Re-open so a checkout done outside gix is observed
        let repo = gix::open(repo.path()).map_err(|e| GitError::ResolveFailed {
            reference: git_ref.to_string(),
            error: e.to_string(),
        })?;
        let id = repo.head_id().map_err(|e| GitError::ResolveFailed {
            reference: git_ref.to_string(),
            error: e.to_string(),
        })?;
        Ok(id.to_hex().to_string())
    }
}

/// VCS provider backed by [`GitOperations`]
#[derive(Debug, Default)]
pub struct GitVcsProvider {
    git: std::sync::Arc<GitOperations>,
}

impl GitVcsProvider {
    /// Create a new provider
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VcsProvider for GitVcsProvider {
    async fn fetch(
        &self,
        locator: &str,
        reference: &GitRef,
        dest: &Path,
    ) -> Result<FetchedSource, FetchCause> {
        let git = std::sync::Arc::clone(&self.git);
        let url = locator.to_string();
        let git_ref = reference.clone();
        let dest = dest.to_path_buf();
        let scratch = filesystem::scratch_path(&dest, "clone");

        tracing::info!(url = %url, reference = %git_ref, "Cloning repository");

        let flag = AbandonFlag::new();
        let _guard = flag.guard();
        let result = tokio::task::spawn_blocking(move || {
            let clone = match git.clone_repo(&url, &git_ref, &scratch) {
                Ok(clone) => clone,
                Err(e) => {
                    if let Err(rm) = filesystem::remove_dir_all(&scratch) {
                        tracing::warn!(path = %scratch.display(), error = %rm, "Failed to remove partial clone");
                    }
                    return Err(clone_cause(e));
                }
            };
            match flag.publish(&scratch, &dest) {
                Ok(true) => Ok(clone.commit_sha),
                Ok(false) => Err(FetchCause::Cancelled),
                Err(e) => Err(FetchCause::Io(e.to_string())),
            }
        })
        .await
        .map_err(|e| FetchCause::Io(format!("clone task failed: {e}")))?;

        result.map(|commit_sha| FetchedSource {
            resolved_version: commit_sha,
        })
    }
}

fn clone_cause(error: GitError) -> FetchCause {
    match error {
        GitError::IoError { path, error } => FetchCause::Io(format!("{}: {error}", path.display())),
        e => FetchCause::Vcs(e.to_string()),
    }
}

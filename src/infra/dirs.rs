//! Platform-specific directory management
//!
//! Provides platform-specific paths for the dependency cache and the global
//! config file. Follows XDG Base Directory Specification on Linux and
//! standard locations on macOS.
//!
//! Environment variables can override default directories:
//! - `RAFT_CACHE_DIR` - Override cache directory
//! - `RAFT_CONFIG_DIR` - Override config directory

use std::env;
use std::path::PathBuf;

/// Environment variable names for directory overrides
pub const ENV_CACHE_DIR: &str = "RAFT_CACHE_DIR";
pub const ENV_CONFIG_DIR: &str = "RAFT_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "raft";

/// Subdirectory holding resolved dependencies
const DEPENDENCY_CACHE_SUBDIR: &str = "deps";

/// Platform-specific directory provider for raft
#[derive(Debug, Clone)]
pub struct RaftDirs {
    cache_dir: PathBuf,
    config_dir: PathBuf,
}

impl RaftDirs {
    /// Create a new `RaftDirs` instance
    ///
    /// Checks environment variables first, then falls back to platform defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_dir: Self::resolve_cache_dir(),
            config_dir: Self::resolve_config_dir(),
        }
    }

    /// Create an instance rooted at explicit directories
    #[must_use]
    pub fn with_paths(cache_dir: PathBuf, config_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            config_dir,
        }
    }

    /// Get the cache directory path
    ///
    /// - Linux: `$XDG_CACHE_HOME/raft` or `~/.cache/raft`
    /// - macOS: `~/Library/Caches/raft`
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    /// Get the config directory path
    ///
    /// - Linux: `$XDG_CONFIG_HOME/raft` or `~/.config/raft`
    /// - macOS: `~/Library/Application Support/raft`
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Root of the resolved-dependency cache
    #[must_use]
    pub fn dependency_cache_dir(&self) -> PathBuf {
        self.cache_dir.join(DEPENDENCY_CACHE_SUBDIR)
    }

    /// Get the global config file path
    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    fn resolve_cache_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_CACHE_DIR) {
            return PathBuf::from(path);
        }

        Self::platform_cache_dir()
    }

    fn resolve_config_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_CONFIG_DIR) {
            return PathBuf::from(path);
        }

        Self::platform_config_dir()
    }

    fn platform_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".cache").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".cache").join(APP_NAME))
            })
    }

    fn platform_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }
}

impl Default for RaftDirs {
    fn default() -> Self {
        Self::new()
    }
}

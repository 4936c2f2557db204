//! Global configuration management
//!
//! Reads settings from `config.toml` in the config directory. Global
//! settings cover fetch concurrency, download retries, the build timeout,
//! the cache location, and the default registry. CLI flags take precedence
//! over these values, and these values over [`crate::config::defaults`].

use crate::infra::dirs::RaftDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Global configuration error types
#[derive(Error, Debug)]
pub enum GlobalConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// Value out of range
    #[error("Invalid value for '{key}' in config file: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Global configuration for raft
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Registry settings
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Fetch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent dependency fetches
    pub jobs: Option<usize>,

    /// Download retry attempts
    pub max_retries: Option<u32>,
}

/// Build configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build-level timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Dependency cache root
    pub dir: Option<PathBuf>,
}

/// Registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Default registry URL for dependencies without an explicit registry
    pub url: Option<String>,
}

impl GlobalConfig {
    /// Load global configuration from the config directory
    ///
    /// A missing file yields the default configuration.
    pub fn load(dirs: &RaftDirs) -> Result<Self, GlobalConfigError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load global configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, GlobalConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GlobalConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| GlobalConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), GlobalConfigError> {
        if self.fetch.jobs == Some(0) {
            return Err(GlobalConfigError::InvalidValue {
                key: "fetch.jobs".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.build.timeout_secs == Some(0) {
            return Err(GlobalConfigError::InvalidValue {
                key: "build.timeout_secs".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Effective number of concurrent fetches
    #[must_use]
    pub fn fetch_jobs(&self) -> usize {
        self.fetch
            .jobs
            .unwrap_or_else(crate::config::defaults::default_fetch_jobs)
    }

    /// Effective download retry count
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.fetch
            .max_retries
            .unwrap_or(crate::config::defaults::MAX_DOWNLOAD_RETRIES)
    }

    /// Configured build timeout, if any
    #[must_use]
    pub fn build_timeout(&self) -> Option<Duration> {
        self.build.timeout_secs.map(Duration::from_secs)
    }

    /// Effective dependency cache root
    #[must_use]
    pub fn cache_dir(&self, dirs: &RaftDirs) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| dirs.dependency_cache_dir())
    }

    /// Effective default registry URL
    #[must_use]
    pub fn registry_url(&self) -> &str {
        self.registry
            .url
            .as_deref()
            .unwrap_or(crate::config::urls::DEFAULT_REGISTRY)
    }
}

//! Default configuration values

/// Manifest file name searched for by the project loader
pub const MANIFEST_FILE: &str = "raft.toml";

/// Lock file name, next to the manifest
pub const LOCK_FILE: &str = "raft.lock";

/// Per-project metadata directory
pub const METADATA_DIR: &str = ".raft";

/// Maximum number of download retry attempts
pub const MAX_DOWNLOAD_RETRIES: u32 = 3;

/// Base delay for download retry backoff (milliseconds)
pub const DOWNLOAD_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Upper bound for the default number of concurrent fetches
pub const MAX_DEFAULT_FETCH_JOBS: usize = 8;

/// Lines of stderr kept in build and hook diagnostics
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Default number of concurrent dependency fetches: host parallelism, capped
pub fn default_fetch_jobs() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_FETCH_JOBS)
}

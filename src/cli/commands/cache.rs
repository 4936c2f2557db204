//! CLI command for `raft cache`
//!
//! Inspects and clears the shared dependency cache.

use anyhow::{Context, Result};

use crate::cli::commands::load_environment;
use crate::cli::output::{status, OutputConfig};
use crate::core::cache::{format_size, FetchCache};

fn open_cache() -> Result<FetchCache> {
    let (dirs, config) = load_environment().context("Failed to load configuration")?;
    Ok(FetchCache::new(config.cache_dir(&dirs)))
}

/// Execute cache info subcommand
pub fn execute_info(output: &OutputConfig) -> Result<()> {
    let info = open_cache()?.info();

    output.status(status::INFO, "Dependency cache");
    output.status(" ", &format!("Location: {}", info.path.display()));
    output.status(" ", &format!("Size: {}", info.format_size()));
    output.status(" ", &format!("Entries: {}", info.item_count));

    if !info.exists {
        output.status(status::WARNING, "Cache directory does not exist (empty cache)");
    }
    Ok(())
}

/// Execute cache clean subcommand
pub fn execute_clean(staging_only: bool, output: &OutputConfig) -> Result<()> {
    let cache = open_cache()?;
    let freed = if staging_only {
        cache
            .clean_staging()
            .context("Failed to remove staging directories")?
    } else {
        cache.clean().context("Failed to clean cache")?
    };

    if freed > 0 {
        output.status(status::SUCCESS, &format!("Cache cleared ({} freed)", format_size(freed)));
    } else {
        output.status(status::SUCCESS, "Cache was already empty");
    }
    Ok(())
}

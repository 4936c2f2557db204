//! Build command implementation
//!
//! Implements `raft build`: wires the providers, the fetch engine and the
//! command executor from the global configuration, then runs the
//! orchestrator.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::commands::{load_environment, BuildArgs};
use crate::cli::output::{status, OutputConfig};
use crate::config::defaults::DOWNLOAD_RETRY_BASE_DELAY_MS;
use crate::core::cache::FetchCache;
use crate::core::executor::{BuildExecutor, BuildResult, CommandBuildExecutor};
use crate::core::fetch::{DependencyFetchEngine, Providers};
use crate::core::global_config::GlobalConfig;
use crate::core::orchestrator::{BuildOptions, Orchestrator};
use crate::error::{ConfigError, RaftError};
use crate::infra::dirs::RaftDirs;
use crate::infra::download::DownloadManager;
use crate::infra::git::GitVcsProvider;
use crate::infra::registry::HttpRegistry;

/// Build an orchestrator from the global configuration
pub fn orchestrator(dirs: &RaftDirs, config: &GlobalConfig, jobs: usize) -> Orchestrator {
    let executor: Arc<dyn BuildExecutor> = Arc::new(CommandBuildExecutor::new(jobs));
    let downloads = DownloadManager::with_config(config.max_retries(), DOWNLOAD_RETRY_BASE_DELAY_MS);
    let providers = Providers {
        vcs: Arc::new(GitVcsProvider::new()),
        registry: Arc::new(HttpRegistry::new(downloads, config.registry_url())),
        executor: Arc::clone(&executor),
    };
    let cache = FetchCache::new(config.cache_dir(dirs));
    Orchestrator::new(DependencyFetchEngine::new(cache, providers, jobs), executor)
}

/// Resolve `--jobs` against the global configuration
fn effective_jobs(args: &BuildArgs, config: &GlobalConfig) -> Result<usize, RaftError> {
    match args.jobs {
        Some(0) => Err(ConfigError::InvalidOption {
            name: "jobs".to_string(),
            reason: "must be greater than 0".to_string(),
        }
        .into()),
        Some(jobs) => Ok(jobs),
        None => Ok(config.fetch_jobs()),
    }
}

fn effective_timeout(args: &BuildArgs, config: &GlobalConfig) -> Result<Option<Duration>, RaftError> {
    match args.timeout {
        Some(0) => Err(ConfigError::InvalidOption {
            name: "timeout".to_string(),
            reason: "must be greater than 0".to_string(),
        }
        .into()),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(config.build_timeout()),
    }
}

/// Execute the build command
pub async fn execute(
    start_dir: &Path,
    args: BuildArgs,
    output: &OutputConfig,
) -> Result<BuildResult, RaftError> {
    let (dirs, config) = load_environment()?;
    let jobs = effective_jobs(&args, &config)?;

    let options = BuildOptions {
        platform: args.platform.clone(),
        architecture: args.arch.clone(),
        start_dir: start_dir.to_path_buf(),
        timeout: effective_timeout(&args, &config)?,
        locked: args.locked,
    };

    tracing::info!(jobs, cache = %config.cache_dir(&dirs).display(), "Starting build");
    let spinner = output.spinner("Building...");
    let result = orchestrator(&dirs, &config, jobs).build(&options).await;
    spinner.finish_and_clear();

    let result = result?;
    output.status(
        status::SUCCESS,
        &format!(
            "Built {} for {} in {:.1}s ({} dependencies)",
            result.project_name,
            result.settings,
            result.duration.as_secs_f64(),
            result.dependencies.len()
        ),
    );
    if output.verbose > 0 {
        for dep in &result.dependencies {
            output.status(
                " ",
                &format!(
                    "{} {} -> {}",
                    dep.spec.name,
                    dep.resolved_version,
                    dep.install_path.display()
                ),
            );
        }
    }
    Ok(result)
}

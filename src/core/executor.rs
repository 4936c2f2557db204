//! Build execution
//!
//! The final step of a build: run the project's platform-specific build rule
//! against its resolved dependencies.

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::config::defaults::DIAGNOSTIC_TAIL_LINES;
use crate::core::build_config::BuildSettings;
use crate::core::build_env::BuildEnvironment;
use crate::core::fetch::ResolvedDependency;
use crate::core::project::Project;
use crate::error::BuildError;
use crate::infra::shell;

/// Outcome of a successful build
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Project name
    pub project_name: String,
    /// Settings the project was built for
    pub settings: BuildSettings,
    /// Dependencies the build saw
    pub dependencies: Vec<ResolvedDependency>,
    /// Wall time of the build step
    pub duration: Duration,
    /// Captured standard output
    pub stdout: String,
}

/// Runs a project's build rule
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Build `project` for `settings` with `resolved` available
    async fn build(
        &self,
        project: &Project,
        settings: &BuildSettings,
        resolved: &[ResolvedDependency],
    ) -> Result<BuildResult, BuildError>;
}

/// Executor running the manifest's `[build]` command through the system shell
#[derive(Debug, Clone)]
pub struct CommandBuildExecutor {
    jobs: usize,
}

impl CommandBuildExecutor {
    /// Create an executor exporting `jobs` as `RAFT_JOBS`
    pub fn new(jobs: usize) -> Self {
        Self { jobs }
    }
}

impl Default for CommandBuildExecutor {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

#[async_trait]
impl BuildExecutor for CommandBuildExecutor {
    async fn build(
        &self,
        project: &Project,
        settings: &BuildSettings,
        resolved: &[ResolvedDependency],
    ) -> Result<BuildResult, BuildError> {
        let started = Instant::now();
        let mut result = BuildResult {
            project_name: project.name().to_string(),
            settings: *settings,
            dependencies: resolved.to_vec(),
            duration: Duration::ZERO,
            stdout: String::new(),
        };

        let Some(command) = project.build_rule().command_for(settings.platform()) else {
            tracing::info!(project = project.name(), "No build rule, nothing to run");
            return Ok(result);
        };

        let env = BuildEnvironment::for_project(project, settings, resolved).with_jobs(self.jobs);
        env.validate()?;

        tracing::info!(project = project.name(), %settings, command, "Running build");
        let output = shell::run(command, project.root(), &env.to_env_map())
            .await
            .map_err(|e| BuildError::SpawnFailed {
                project: project.name().to_string(),
                command: command.to_string(),
                error: e.to_string(),
            })?;

        if !output.success() {
            let diagnostic = if output.stderr.trim().is_empty() {
                shell::tail(&output.stdout, DIAGNOSTIC_TAIL_LINES)
            } else {
                shell::tail(&output.stderr, DIAGNOSTIC_TAIL_LINES)
            };
            return Err(BuildError::BuildFailed {
                project: project.name().to_string(),
                status: output.status_label(),
                diagnostic,
            });
        }

        result.duration = started.elapsed();
        result.stdout = output.stdout;
        tracing::debug!(project = project.name(), duration = ?result.duration, "Build finished");
        Ok(result)
    }
}

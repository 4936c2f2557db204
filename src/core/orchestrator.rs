//! Build orchestration
//!
//! Runs one build as a strict sequence of phases: resolve settings, load the
//! project, validate every dependency spec, fetch all dependencies
//! concurrently, run the `beforeBuild` hooks, run the build rule, and record
//! the resolved versions in `raft.lock`. A phase starts only after the
//! previous one has settled successfully.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::core::build_config::{self, BuildSettings};
use crate::core::dependency::{self, DependencySpec};
use crate::core::executor::{BuildExecutor, BuildResult};
use crate::core::fetch::{DependencyFetchEngine, ResolvedDependency};
use crate::core::hooks::{HookContext, HookHandler, HookRegistry, HookRunner, BEFORE_BUILD};
use crate::core::lock::LockFile;
use crate::core::project::Project;
use crate::error::RaftError;

/// Options for a single build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Target platform, host platform when `None`
    pub platform: Option<String>,
    /// Target architecture, host architecture when `None`
    pub architecture: Option<String>,
    /// Directory the project search starts from
    pub start_dir: PathBuf,
    /// Deadline for the whole build
    pub timeout: Option<Duration>,
    /// Fail instead of changing `raft.lock`
    pub locked: bool,
}

impl BuildOptions {
    /// Host build of the project containing `start_dir`
    pub fn new(start_dir: impl Into<PathBuf>) -> Self {
        Self {
            platform: None,
            architecture: None,
            start_dir: start_dir.into(),
            timeout: None,
            locked: false,
        }
    }

    /// Set the target platform
    #[must_use]
    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = Some(platform.to_string());
        self
    }

    /// Set the target architecture
    #[must_use]
    pub fn with_architecture(mut self, architecture: &str) -> Self {
        self.architecture = Some(architecture.to_string());
        self
    }

    /// Set the build deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Require `raft.lock` to be up to date
    #[must_use]
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }
}

/// Drives a build from settings to artifacts
pub struct Orchestrator {
    engine: DependencyFetchEngine,
    executor: Arc<dyn BuildExecutor>,
    hooks: HookRegistry,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("engine", &self.engine)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator fetching through `engine` and building with `executor`
    pub fn new(engine: DependencyFetchEngine, executor: Arc<dyn BuildExecutor>) -> Self {
        Self {
            engine,
            executor,
            hooks: HookRegistry::new(),
        }
    }

    /// Register a programmatic hook handler
    ///
    /// Programmatic handlers run before the manifest's `[hooks]` commands.
    #[must_use]
    pub fn with_hook(mut self, phase: &str, handler: Arc<dyn HookHandler>) -> Self {
        self.hooks.register(phase, handler);
        self
    }

    /// The fetch engine
    pub fn engine(&self) -> &DependencyFetchEngine {
        &self.engine
    }

    /// Run a build
    ///
    /// When the deadline elapses every outstanding fetch is cancelled and
    /// `BuildTimeout` is returned; entries already committed stay cached.
    pub async fn build(&self, options: &BuildOptions) -> Result<BuildResult, RaftError> {
        let cancel = CancellationToken::new();
        let run = self.run(options, &cancel);

        let Some(timeout) = options.timeout else {
            return run.await;
        };

        if let Ok(result) = tokio::time::timeout(timeout, run).await {
            result
        } else {
            cancel.cancel();
            tracing::error!(timeout = ?timeout, "Build deadline elapsed, cancelling");
            Err(RaftError::BuildTimeout {
                seconds: timeout.as_secs(),
            })
        }
    }

    async fn run(
        &self,
        options: &BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<BuildResult, RaftError> {
        let settings =
            build_config::parse(options.platform.as_deref(), options.architecture.as_deref())?;
        let project = Arc::new(Project::find(&options.start_dir)?);
        let specs = dependency::resolve_all(&project)?;

        let span = tracing::info_span!(
            "build",
            project = project.name(),
            platform = %settings.platform(),
            arch = %settings.architecture()
        );

        async move {
            tracing::info!(phase = "fetch", dependencies = specs.len(), "Resolving dependencies");
            let resolved = self.fetch_all(&project, settings, specs, cancel).await?;

            let lock = LockFile::from_resolved(&resolved);
            if options.locked {
                check_locked(&project, &lock)?;
            }

            let hooks = self.hooks.with_project_hooks(&project);
            let ctx = HookContext {
                project: &project,
                settings: &settings,
                dependencies: &resolved,
            };
            tracing::info!(phase = BEFORE_BUILD, "Running hooks");
            HookRunner::new(&hooks).run(BEFORE_BUILD, ctx).await?;

            tracing::info!(phase = "build", "Building");
            let result = self.executor.build(&project, &settings, &resolved).await?;

            write_lock(&project, &lock)?;
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Fetch every spec concurrently and wait until all have settled
    ///
    /// The first failure cancels the remaining fetches and is returned once
    /// the whole set has drained. Results keep manifest order.
    async fn fetch_all(
        &self,
        project: &Arc<Project>,
        settings: BuildSettings,
        specs: Vec<DependencySpec>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResolvedDependency>, RaftError> {
        let fetch_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        let count = specs.len();

        for (index, spec) in specs.into_iter().enumerate() {
            let engine = self.engine.clone();
            let project = Arc::clone(project);
            let cancel = fetch_cancel.clone();
            tasks.spawn(async move {
                let result = engine.resolve(&project, &settings, &spec, &cancel).await;
                (index, result)
            });
        }

        let mut resolved: Vec<Option<ResolvedDependency>> = vec![None; count];
        let mut first_error: Option<RaftError> = None;

        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok((index, Ok(dependency))) => {
                    tracing::debug!(
                        dependency = %dependency.spec.name,
                        path = %dependency.install_path.display(),
                        "Dependency ready"
                    );
                    resolved[index] = Some(dependency);
                    continue;
                }
                Ok((_, Err(e))) => {
                    if first_error.is_some() && e.is_cancelled() {
                        continue;
                    }
                    RaftError::DependencyFetch(e)
                }
                Err(e) => RaftError::Io(std::io::Error::other(format!("fetch task failed: {e}"))),
            };

            if first_error.is_none() {
                fetch_cancel.cancel();
                first_error = Some(error);
            } else {
                tracing::warn!(error = %error, "Additional dependency failure");
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(resolved.into_iter().flatten().collect()),
        }
    }
}

fn check_locked(project: &Project, lock: &LockFile) -> Result<(), RaftError> {
    match project.lock() {
        Some(existing) if existing == lock => Ok(()),
        None if lock.dependencies.is_empty() => Ok(()),
        Some(_) => Err(RaftError::Lock(format!(
            "{} needs to be updated but --locked was given",
            project.lock_path().display()
        ))),
        None => Err(RaftError::Lock(format!(
            "{} is missing but --locked was given",
            project.lock_path().display()
        ))),
    }
}

fn write_lock(project: &Project, lock: &LockFile) -> Result<(), RaftError> {
    if project.lock() == Some(lock) {
        return Ok(());
    }
    if project.lock().is_none() && lock.dependencies.is_empty() {
        return Ok(());
    }

    tracing::info!(path = %project.lock_path().display(), "Writing lock file");
    lock.save(&project.lock_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::FetchCache;
    use crate::core::executor::CommandBuildExecutor;
    use crate::core::fetch::Providers;
    use crate::error::ConfigError;
    use crate::infra::download::DownloadManager;
    use crate::infra::git::GitVcsProvider;
    use crate::infra::registry::HttpRegistry;
    use tempfile::TempDir;

    fn orchestrator(cache: &TempDir) -> Orchestrator {
        let executor: Arc<dyn BuildExecutor> = Arc::new(CommandBuildExecutor::new(1));
        let providers = Providers {
            vcs: Arc::new(GitVcsProvider::new()),
            registry: Arc::new(HttpRegistry::new(
                DownloadManager::new(),
                "http://127.0.0.1:9",
            )),
            executor: Arc::clone(&executor),
        };
        let engine =
            DependencyFetchEngine::new(FetchCache::new(cache.path().to_path_buf()), providers, 2);
        Orchestrator::new(engine, executor)
    }

    #[tokio::test]
    async fn test_invalid_platform_fails_before_project_lookup() {
        let cache = TempDir::new().unwrap();
        let options = BuildOptions::new("/nonexistent/raft/project").with_platform("beos");

        let err = orchestrator(&cache).build(&options).await.unwrap_err();
        assert!(matches!(
            err,
            RaftError::Config(ConfigError::UnsupportedPlatform { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_project() {
        let cache = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        let options = BuildOptions::new(empty.path())
            .with_platform("linux")
            .with_architecture("x64");

        let err = orchestrator(&cache).build(&options).await.unwrap_err();
        assert!(matches!(err, RaftError::ProjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_invalid_spec_fails_before_fetch() {
        let cache = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(
            project.path().join("raft.toml"),
            "[dependencies]\nbad = { git = \"https://example.com/bad.git\" }\n",
        )
        .unwrap();
        let options = BuildOptions::new(project.path())
            .with_platform("linux")
            .with_architecture("x64");

        let err = orchestrator(&cache).build(&options).await.unwrap_err();
        assert!(matches!(err, RaftError::InvalidDependencySpec(_)));
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_no_dependencies_writes_no_lock() {
        let cache = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join("raft.toml"), "[project]\nname = \"solo\"\n").unwrap();
        let options = BuildOptions::new(project.path())
            .with_platform("linux")
            .with_architecture("x64");

        let result = orchestrator(&cache).build(&options).await.unwrap();
        assert_eq!(result.project_name, "solo");
        assert!(result.dependencies.is_empty());
        assert!(!project.path().join("raft.lock").exists());
    }

    #[tokio::test]
    async fn test_locked_without_lock_file_and_no_dependencies() {
        let cache = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join("raft.toml"), "[project]\nname = \"solo\"\n").unwrap();
        let options = BuildOptions::new(project.path())
            .with_platform("linux")
            .with_architecture("x64")
            .locked();

        assert!(orchestrator(&cache).build(&options).await.is_ok());
    }
}

//! Dependency fetch engine
//!
//! Resolves a dependency spec for a set of build settings to an installed,
//! cached artifact. Concurrent requests for the same cache key share one
//! fetch; provider work is bounded by a semaphore; a fetched tree that is
//! itself a raft project is built before it is committed.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::defaults::MANIFEST_FILE;
use crate::core::build_config::BuildSettings;
use crate::core::cache::{CacheEntry, CacheKey, FetchCache};
use crate::core::dependency::{self, DependencySpec, Source};
use crate::core::executor::BuildExecutor;
use crate::core::project::Project;
use crate::infra::git::GitRef;
use crate::infra::local;

/// Why a dependency could not be fetched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchCause {
    /// Network failure after retries
    #[error("network error: {0}")]
    Network(String),

    /// Credentials rejected
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Downloaded content did not match its checksum
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Clone or checkout failed
    #[error("version control error: {0}")]
    Vcs(String),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The dependency's own build failed
    #[error("sub-build failed: {0}")]
    SubBuild(String),

    /// Dependency chain loops back on itself
    #[error("circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// Registry range without a pinned version
    #[error("version range '{0}' is not pinned")]
    Unpinned(String),

    /// Fetch was abandoned because the build was cancelled
    #[error("cancelled")]
    Cancelled,
}

/// Dependency fetch failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{name}': {cause}")]
pub struct FetchError {
    /// Dependency name
    pub name: String,
    /// Cause
    pub cause: FetchCause,
}

impl FetchError {
    /// Create a fetch error for dependency `name`
    pub fn new(name: &str, cause: FetchCause) -> Self {
        Self {
            name: name.to_string(),
            cause,
        }
    }

    /// Whether the fetch was cancelled rather than failed
    pub fn is_cancelled(&self) -> bool {
        self.cause == FetchCause::Cancelled
    }
}

/// What a provider produced in the destination directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSource {
    /// Commit SHA, exact version, or content hash
    pub resolved_version: String,
}

/// Version control provider
#[async_trait]
pub trait VcsProvider: Send + Sync {
    /// Check out `reference` of `locator` into `dest`, which must not exist
    async fn fetch(
        &self,
        locator: &str,
        reference: &GitRef,
        dest: &Path,
    ) -> Result<FetchedSource, FetchCause>;
}

/// Registry artifact request
#[derive(Debug, Clone, Copy)]
pub struct RegistryRequest<'a> {
    /// Dependency name
    pub name: &'a str,
    /// Exact version
    pub version: &'a semver::Version,
    /// Registry URL, `None` for the default registry
    pub registry: Option<&'a str>,
    /// Expected artifact checksum
    pub sha256: Option<&'a str>,
}

/// Registry provider
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// Download and unpack the artifact into `dest`
    async fn fetch(
        &self,
        request: &RegistryRequest<'_>,
        dest: &Path,
    ) -> Result<FetchedSource, FetchCause>;
}

/// A dependency fetched, built if needed, and committed to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// The spec it was resolved from
    pub spec: DependencySpec,
    /// Commit SHA, exact version, or content hash
    pub resolved_version: String,
    /// Installed artifact directory
    pub install_path: PathBuf,
    /// Settings the artifact was built for
    pub built_for: BuildSettings,
}

impl ResolvedDependency {
    fn from_entry(spec: DependencySpec, entry: CacheEntry, settings: BuildSettings) -> Self {
        Self {
            spec,
            resolved_version: entry.resolved_version,
            install_path: entry.install_path,
            built_for: settings,
        }
    }
}

/// Collaborators the engine dispatches to
pub struct Providers {
    /// VCS provider
    pub vcs: Arc<dyn VcsProvider>,
    /// Registry provider
    pub registry: Arc<dyn RegistryProvider>,
    /// Executor for dependencies that are raft projects
    pub executor: Arc<dyn BuildExecutor>,
}

type FetchResult = Result<ResolvedDependency, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// In-flight fetches and the wait-for edges between them, keyed by digest
#[derive(Default)]
struct InFlight {
    fetches: HashMap<String, SharedFetch>,
    names: HashMap<String, String>,
    waits: HashMap<String, HashSet<String>>,
}

impl InFlight {
    /// Path of digests from `from` to `to` along wait edges
    fn wait_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut stack = vec![vec![from.to_string()]];
        let mut visited = HashSet::new();

        while let Some(path) = stack.pop() {
            let last = path.last()?.clone();
            if last == to {
                return Some(path);
            }
            if !visited.insert(last.clone()) {
                continue;
            }
            for next in self.waits.get(&last).into_iter().flatten() {
                let mut extended = path.clone();
                extended.push(next.clone());
                stack.push(extended);
            }
        }
        None
    }

    fn name_of(&self, digest: &str) -> String {
        self.names
            .get(digest)
            .cloned()
            .unwrap_or_else(|| digest.to_string())
    }
}

struct EngineInner {
    cache: FetchCache,
    vcs: Arc<dyn VcsProvider>,
    registry: Arc<dyn RegistryProvider>,
    executor: Arc<dyn BuildExecutor>,
    permits: Semaphore,
    in_flight: Mutex<InFlight>,
}

/// Resolves dependency specs to cached artifacts
#[derive(Clone)]
pub struct DependencyFetchEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for DependencyFetchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyFetchEngine")
            .field("cache", &self.inner.cache.root())
            .field("available_permits", &self.inner.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl DependencyFetchEngine {
    /// Create an engine running at most `jobs` provider fetches at once
    pub fn new(cache: FetchCache, providers: Providers, jobs: usize) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                cache,
                vcs: providers.vcs,
                registry: providers.registry,
                executor: providers.executor,
                permits: Semaphore::new(jobs.max(1)),
                in_flight: Mutex::new(InFlight::default()),
            }),
        }
    }

    /// The cache this engine commits to
    pub fn cache(&self) -> &FetchCache {
        &self.inner.cache
    }

    /// Resolve `spec` for `settings`
    ///
    /// Returns `Cancelled` as soon as `cancel` fires; a fetch shared with
    /// other requesters keeps the token of the request that started it.
    pub async fn resolve(
        &self,
        project: &Project,
        settings: &BuildSettings,
        spec: &DependencySpec,
        cancel: &CancellationToken,
    ) -> FetchResult {
        let span = tracing::info_span!(
            "resolve",
            project = project.name(),
            dependency = %spec.name,
            platform = %settings.platform(),
            arch = %settings.architecture()
        );
        self.resolve_from(None, *settings, spec.clone(), cancel.clone())
            .instrument(span)
            .await
    }

    fn resolve_from(
        &self,
        parent: Option<String>,
        settings: BuildSettings,
        spec: DependencySpec,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, FetchResult> {
        let engine = self.clone();
        async move {
            let version = engine
                .key_version(&spec)
                .await
                .map_err(|cause| FetchError::new(&spec.name, cause))?;
            let key = CacheKey::new(&spec, settings, &version);
            let digest = key.digest();

            let shared = engine.attach(parent.as_deref(), key, &spec, &cancel)?;
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(FetchError::new(&spec.name, FetchCause::Cancelled)),
                result = shared => result,
            };

            if let Some(parent) = &parent {
                if let Some(edges) = engine.state().waits.get_mut(parent) {
                    edges.remove(&digest);
                }
            }

            // Shared fetches carry the spec of whoever started them
            result.map(|resolved| ResolvedDependency { spec, ..resolved })
        }
        .boxed()
    }

    fn state(&self) -> MutexGuard<'_, InFlight> {
        // A panic while holding the lock leaves the maps consistent
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Version the cache key is computed from
    async fn key_version(&self, spec: &DependencySpec) -> Result<String, FetchCause> {
        match &spec.source {
            Source::Path { path } => local::content_hash(path).await,
            Source::Registry { version, .. } if version.concrete().is_none() => {
                Err(FetchCause::Unpinned(version.constraint()))
            }
            _ => spec
                .pinned_version()
                .ok_or_else(|| FetchCause::Unpinned(spec.version_constraint())),
        }
    }

    /// Join the in-flight fetch for `key` or start one
    fn attach(
        &self,
        parent: Option<&str>,
        key: CacheKey,
        spec: &DependencySpec,
        cancel: &CancellationToken,
    ) -> Result<SharedFetch, FetchError> {
        let digest = key.digest();
        let mut state = self.state();

        if let Some(parent) = parent {
            if let Some(path) = state.wait_path(&digest, parent) {
                let mut chain: Vec<String> = path.iter().map(|d| state.name_of(d)).collect();
                chain.push(spec.name.clone());
                return Err(FetchError::new(
                    &spec.name,
                    FetchCause::CircularDependency(chain),
                ));
            }
        }

        let shared = if let Some(existing) = state.fetches.get(&digest) {
            tracing::debug!(dependency = %spec.name, "Joining in-flight fetch");
            existing.clone()
        } else {
            let name = spec.name.clone();
            let task = tokio::spawn(self.clone().fetch_task(key, spec.clone(), cancel.clone()));
            let shared = async move {
                task.await.unwrap_or_else(|e| {
                    Err(FetchError::new(
                        &name,
                        FetchCause::Io(format!("fetch task failed: {e}")),
                    ))
                })
            }
            .boxed()
            .shared();

            state.fetches.insert(digest.clone(), shared.clone());
            state.names.insert(digest.clone(), spec.name.clone());
            shared
        };

        if let Some(parent) = parent {
            state
                .waits
                .entry(parent.to_string())
                .or_default()
                .insert(digest);
        }

        Ok(shared)
    }

    async fn fetch_task(
        self,
        key: CacheKey,
        spec: DependencySpec,
        cancel: CancellationToken,
    ) -> FetchResult {
        let digest = key.digest();
        let settings = key.settings;
        let result = self
            .fetch_uncached(&key, &spec, &cancel)
            .await
            .map(|entry| ResolvedDependency::from_entry(spec.clone(), entry, settings))
            .map_err(|cause| FetchError::new(&spec.name, cause));

        let mut state = self.state();
        state.fetches.remove(&digest);
        state.names.remove(&digest);
        state.waits.remove(&digest);
        drop(state);

        result
    }

    async fn fetch_uncached(
        &self,
        key: &CacheKey,
        spec: &DependencySpec,
        cancel: &CancellationToken,
    ) -> Result<CacheEntry, FetchCause> {
        if let Some(entry) = self.inner.cache.lookup(key).await.map_err(cache_cause)? {
            tracing::debug!(dependency = %spec.name, path = %entry.install_path.display(), "Cache hit");
            return Ok(entry);
        }

        let staging = self.inner.cache.staging_dir(&spec.name).map_err(cache_cause)?;
        let result = self.populate(key, spec, &staging, cancel).await;

        if result.is_err() && tokio::fs::metadata(&staging).await.is_ok() {
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                tracing::warn!(path = %staging.display(), error = %e, "Failed to remove staging directory");
            }
        }
        result
    }

    async fn populate(
        &self,
        key: &CacheKey,
        spec: &DependencySpec,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<CacheEntry, FetchCause> {
        let fetched = {
            let _permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchCause::Cancelled),
                permit = self.inner.permits.acquire() => permit.map_err(|_| FetchCause::Cancelled)?,
            };

            tracing::info!(dependency = %spec.name, kind = %spec.source_kind(), "Fetching");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchCause::Cancelled),
                fetched = self.dispatch(spec, &key.version, staging) => fetched?,
            }
        };

        if cancel.is_cancelled() {
            return Err(FetchCause::Cancelled);
        }

        self.sub_build(key, spec, staging, cancel).await?;

        self.inner
            .cache
            .commit(key, staging, &fetched.resolved_version, &spec.source_description())
            .await
            .map_err(cache_cause)
    }

    async fn dispatch(
        &self,
        spec: &DependencySpec,
        version: &str,
        staging: &Path,
    ) -> Result<FetchedSource, FetchCause> {
        match &spec.source {
            Source::Vcs { url, reference } => self.inner.vcs.fetch(url, reference, staging).await,
            Source::Registry {
                registry,
                version: registry_version,
                sha256,
            } => {
                let exact = registry_version
                    .concrete()
                    .ok_or_else(|| FetchCause::Unpinned(registry_version.constraint()))?;
                let request = RegistryRequest {
                    name: &spec.name,
                    version: exact,
                    registry: registry.as_deref(),
                    sha256: sha256.as_deref(),
                };
                self.inner.registry.fetch(&request, staging).await
            }
            Source::Path { path } => local::copy_source(path, staging, version).await,
        }
    }

    /// Build a fetched tree that is itself a raft project with a build rule
    ///
    /// A copied path source keeps resolving its relative `path` entries
    /// against the directory it was copied from.
    async fn sub_build(
        &self,
        key: &CacheKey,
        spec: &DependencySpec,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), FetchCause> {
        if !staging.join(MANIFEST_FILE).is_file() {
            return Ok(());
        }

        let settings = key.settings;
        let project = Project::load(staging).map_err(|e| FetchCause::SubBuild(e.to_string()))?;
        let project = match &spec.source {
            Source::Path { path } => project.with_source_root(path),
            _ => project,
        };
        if project.build_rule().command_for(settings.platform()).is_none() {
            return Ok(());
        }

        let specs =
            dependency::resolve_all(&project).map_err(|e| FetchCause::SubBuild(e.to_string()))?;
        tracing::info!(
            project = project.name(),
            dependencies = specs.len(),
            "Building fetched dependency"
        );

        let digest = key.digest();
        let nested = specs
            .into_iter()
            .map(|spec| self.resolve_from(Some(digest.clone()), settings, spec, cancel.clone()));
        let dependencies = futures::future::try_join_all(nested)
            .await
            .map_err(|e| match e.cause {
                FetchCause::CircularDependency(_) | FetchCause::Cancelled => e.cause,
                _ => FetchCause::SubBuild(e.to_string()),
            })?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchCause::Cancelled),
            built = self.inner.executor.build(&project, &settings, &dependencies) => {
                built.map(|_| ()).map_err(|e| FetchCause::SubBuild(e.to_string()))
            }
        }
    }
}

fn cache_cause(error: crate::core::cache::CacheError) -> FetchCause {
    FetchCause::Io(error.to_string())
}

//! Common test utilities and helpers
//!
//! This module provides shared fixtures for integration tests: temporary
//! projects, in-memory providers that count their calls, and an executor and
//! hook that record what they saw.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use raft::core::build_config::BuildSettings;
use raft::core::cache::FetchCache;
use raft::core::executor::{BuildExecutor, BuildResult};
use raft::core::fetch::{
    DependencyFetchEngine, FetchCause, FetchedSource, Providers, RegistryProvider,
    RegistryRequest, ResolvedDependency, VcsProvider,
};
use raft::core::hooks::{HookContext, HookHandler};
use raft::core::project::Project;
use raft::error::BuildError;
use raft::infra::git::GitRef;

/// Test project context
///
/// Creates a temporary directory for test projects and provides
/// utilities for setting up test scenarios.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a project whose `raft.toml` has `manifest` as content
    pub fn with_manifest(manifest: &str) -> Self {
        let project = Self::new();
        project.create_file("raft.toml", manifest);
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Load the project
    pub fn load(&self) -> Project {
        Project::load(self.dir.path()).expect("Failed to load project")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, ordered log of events across fixtures
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first event equal to `event`
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// Behavior of the mock VCS for one locator
#[derive(Debug, Clone, Default)]
pub struct RepoBehavior {
    /// Delay before the fetch completes
    pub delay: Option<Duration>,
    /// Number of leading calls that fail with a network error
    pub failures: usize,
    /// Fail every call with this cause
    pub always_fail: Option<FetchCause>,
    /// Extra files written into the checkout
    pub files: Vec<(String, String)>,
}

/// In-memory VCS provider counting fetches per `(locator, ref)`
#[derive(Debug, Default)]
pub struct MockVcs {
    behaviors: Mutex<HashMap<String, RepoBehavior>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    log: EventLog,
}

/// Decrements the active fetch count on every exit path
struct ActiveFetch<'a>(&'a AtomicUsize);

impl Drop for ActiveFetch<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockVcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_log(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            ..Self::default()
        })
    }

    /// Configure the behavior for `locator`
    pub fn set(&self, locator: &str, behavior: RepoBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(locator.to_string(), behavior);
    }

    /// Number of fetches of `locator` at any ref
    pub fn calls(&self, locator: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(&format!("{locator}#")))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Number of fetches across all locators
    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Most fetches observed running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Commit SHA the mock reports for `(locator, reference)`
    pub fn commit_for(locator: &str, reference: &GitRef) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(format!("{locator}#{reference}").as_bytes());
        hex::encode(&digest[..20])
    }
}

#[async_trait]
impl VcsProvider for MockVcs {
    async fn fetch(
        &self,
        locator: &str,
        reference: &GitRef,
        dest: &Path,
    ) -> Result<FetchedSource, FetchCause> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(format!("{locator}#{reference}")).or_insert(0);
            *count += 1;
            *count
        };
        self.total.fetch_add(1, Ordering::SeqCst);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let _active = ActiveFetch(&self.active);

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .unwrap_or_default();

        if let Some(delay) = behavior.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(cause) = behavior.always_fail {
            self.log.push(format!("fetch-failed:{locator}"));
            return Err(cause);
        }
        if call <= behavior.failures {
            self.log.push(format!("fetch-failed:{locator}"));
            return Err(FetchCause::Network(format!("connection reset fetching {locator}")));
        }

        std::fs::create_dir_all(dest).map_err(|e| FetchCause::Io(e.to_string()))?;
        std::fs::write(dest.join("SOURCE"), format!("{locator}#{reference}\n"))
            .map_err(|e| FetchCause::Io(e.to_string()))?;
        for (name, content) in &behavior.files {
            let path = dest.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| FetchCause::Io(e.to_string()))?;
            }
            std::fs::write(path, content).map_err(|e| FetchCause::Io(e.to_string()))?;
        }

        self.log.push(format!("fetched:{locator}"));
        Ok(FetchedSource {
            resolved_version: Self::commit_for(locator, reference),
        })
    }
}

/// Registry provider that must never be called
#[derive(Debug, Default)]
pub struct NoRegistry;

#[async_trait]
impl RegistryProvider for NoRegistry {
    async fn fetch(
        &self,
        request: &RegistryRequest<'_>,
        _dest: &Path,
    ) -> Result<FetchedSource, FetchCause> {
        Err(FetchCause::Network(format!(
            "unexpected registry fetch of {}",
            request.name
        )))
    }
}

/// What the recording executor saw for one build
#[derive(Debug, Clone)]
pub struct RecordedBuild {
    pub project: String,
    pub settings: BuildSettings,
    pub dependencies: Vec<(String, PathBuf)>,
}

/// Executor recording every build instead of running commands
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    builds: Mutex<Vec<RecordedBuild>>,
    failing: Mutex<Vec<String>>,
    log: EventLog,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_log(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            ..Self::default()
        })
    }

    /// Make builds of project `name` fail
    pub fn fail_project(&self, name: &str) {
        self.failing.lock().unwrap().push(name.to_string());
    }

    pub fn builds(&self) -> Vec<RecordedBuild> {
        self.builds.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildExecutor for RecordingExecutor {
    async fn build(
        &self,
        project: &Project,
        settings: &BuildSettings,
        resolved: &[ResolvedDependency],
    ) -> Result<BuildResult, BuildError> {
        self.log.push(format!("build:{}", project.name()));
        self.builds.lock().unwrap().push(RecordedBuild {
            project: project.name().to_string(),
            settings: *settings,
            dependencies: resolved
                .iter()
                .map(|d| (d.spec.name.clone(), d.install_path.clone()))
                .collect(),
        });

        if self.failing.lock().unwrap().iter().any(|p| p == project.name()) {
            return Err(BuildError::BuildFailed {
                project: project.name().to_string(),
                status: "exit code 1".to_string(),
                diagnostic: "recorded failure".to_string(),
            });
        }

        Ok(BuildResult {
            project_name: project.name().to_string(),
            settings: *settings,
            dependencies: resolved.to_vec(),
            duration: Duration::ZERO,
            stdout: String::new(),
        })
    }
}

/// Hook recording its invocations into an event log
#[derive(Debug)]
pub struct RecordingHook {
    pub name: String,
    pub log: EventLog,
    pub fail: bool,
}

impl RecordingHook {
    pub fn new(name: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            fail: false,
        })
    }

    pub fn failing(name: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            fail: true,
        })
    }
}

#[async_trait]
impl HookHandler for RecordingHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: HookContext<'_>) -> Result<(), String> {
        self.log.push(format!(
            "hook:{}:{}",
            self.name,
            ctx.dependencies.len()
        ));
        if self.fail {
            Err("hook refused".to_string())
        } else {
            Ok(())
        }
    }
}

/// Engine over a cache in `cache_dir` with the given providers
pub fn engine(
    cache_dir: &Path,
    vcs: Arc<dyn VcsProvider>,
    registry: Arc<dyn RegistryProvider>,
    executor: Arc<dyn BuildExecutor>,
    jobs: usize,
) -> DependencyFetchEngine {
    DependencyFetchEngine::new(
        FetchCache::new(cache_dir.to_path_buf()),
        Providers {
            vcs,
            registry,
            executor,
        },
        jobs,
    )
}

/// Manifest declaring git dependencies `(name, url, tag)`
pub fn git_manifest(project: &str, deps: &[(&str, &str, &str)]) -> String {
    let mut manifest = format!("[project]\nname = \"{project}\"\n\n[dependencies]\n");
    for (name, url, tag) in deps {
        manifest.push_str(&format!("{name} = {{ git = \"{url}\", tag = \"{tag}\" }}\n"));
    }
    manifest
}

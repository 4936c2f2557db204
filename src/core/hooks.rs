//! Build hooks
//!
//! Named phases with ordered handlers. The orchestrator runs the
//! `beforeBuild` phase once every dependency has been fetched and before the
//! build rule runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::defaults::DIAGNOSTIC_TAIL_LINES;
use crate::core::build_config::BuildSettings;
use crate::core::build_env::BuildEnvironment;
use crate::core::fetch::ResolvedDependency;
use crate::core::project::Project;
use crate::infra::shell;

/// Phase run after dependency resolution, before the build
pub const BEFORE_BUILD: &str = "beforeBuild";

/// A hook handler failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{phase} hook '{handler}' failed: {message}")]
pub struct HookError {
    /// Phase name
    pub phase: String,
    /// Handler name
    pub handler: String,
    /// Failure description
    pub message: String,
}

/// Read-only view handed to handlers
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Project being built
    pub project: &'a Project,
    /// Target settings
    pub settings: &'a BuildSettings,
    /// Dependencies resolved for the build
    pub dependencies: &'a [ResolvedDependency],
}

/// A hook handler
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Run the handler; an `Err` aborts the phase
    async fn run(&self, ctx: HookContext<'_>) -> Result<(), String>;
}

/// Handler running a manifest `[hooks]` command through the system shell
#[derive(Debug, Clone)]
pub struct CommandHook {
    command: String,
}

impl CommandHook {
    /// Hook running `command`
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

#[async_trait]
impl HookHandler for CommandHook {
    fn name(&self) -> &str {
        &self.command
    }

    async fn run(&self, ctx: HookContext<'_>) -> Result<(), String> {
        let env = BuildEnvironment::for_project(ctx.project, ctx.settings, ctx.dependencies);
        let output = shell::run(&self.command, ctx.project.root(), &env.to_env_map())
            .await
            .map_err(|e| format!("failed to start: {e}"))?;

        if output.success() {
            Ok(())
        } else {
            let tail = shell::tail(&output.stderr, DIAGNOSTIC_TAIL_LINES);
            if tail.is_empty() {
                Err(output.status_label())
            } else {
                Err(format!("{}: {tail}", output.status_label()))
            }
        }
    }
}

/// Handlers per phase, in registration order
#[derive(Clone, Default)]
pub struct HookRegistry {
    phases: HashMap<String, Vec<Arc<dyn HookHandler>>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phases: HashMap<&str, Vec<&str>> = self
            .phases
            .iter()
            .map(|(phase, handlers)| (phase.as_str(), handlers.iter().map(|h| h.name()).collect()))
            .collect();
        f.debug_struct("HookRegistry").field("phases", &phases).finish()
    }
}

impl HookRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to `phase`
    pub fn register(&mut self, phase: &str, handler: Arc<dyn HookHandler>) {
        self.phases.entry(phase.to_string()).or_default().push(handler);
    }

    /// Handlers registered for `phase`
    pub fn handlers(&self, phase: &str) -> &[Arc<dyn HookHandler>] {
        self.phases.get(phase).map_or(&[], Vec::as_slice)
    }

    /// This registry followed by the project's `[hooks]` commands
    pub fn with_project_hooks(&self, project: &Project) -> Self {
        let mut registry = self.clone();
        for command in &project.hooks().before_build {
            registry.register(BEFORE_BUILD, Arc::new(CommandHook::new(command)));
        }
        registry
    }
}

/// Runs the handlers of a phase
#[derive(Debug)]
pub struct HookRunner<'a> {
    registry: &'a HookRegistry,
}

impl<'a> HookRunner<'a> {
    /// Runner over `registry`
    pub fn new(registry: &'a HookRegistry) -> Self {
        Self { registry }
    }

    /// Run every handler of `phase` in registration order
    ///
    /// Stops at the first failing handler.
    pub async fn run(&self, phase: &str, ctx: HookContext<'_>) -> Result<(), HookError> {
        let handlers = self.registry.handlers(phase);
        if handlers.is_empty() {
            return Ok(());
        }

        tracing::info!(phase, handlers = handlers.len(), "Running hooks");
        for handler in handlers {
            tracing::debug!(phase, handler = handler.name(), "Running hook");
            handler.run(ctx).await.map_err(|message| HookError {
                phase: phase.to_string(),
                handler: handler.name().to_string(),
                message,
            })?;
        }
        Ok(())
    }
}

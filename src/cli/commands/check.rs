//! Check command implementation
//!
//! Implements `raft check`: resolves the build settings, loads the project
//! and validates every dependency spec. Nothing is fetched.

use std::path::Path;

use crate::cli::commands::TargetArgs;
use crate::cli::output::{status, OutputConfig};
use crate::core::build_config;
use crate::core::dependency::{self, DependencySpec};
use crate::core::project::Project;
use crate::error::RaftError;

/// Execute the check command
pub fn execute(
    start_dir: &Path,
    args: &TargetArgs,
    output: &OutputConfig,
) -> Result<Vec<DependencySpec>, RaftError> {
    let settings = build_config::parse(args.platform.as_deref(), args.arch.as_deref())?;
    let project = Project::find(start_dir)?;
    tracing::info!(project = project.name(), %settings, "Checking project");

    let specs = dependency::resolve_all(&project)?;

    output.status(
        status::SUCCESS,
        &format!("Project '{}' is valid for {settings}", project.name()),
    );
    for spec in &specs {
        output.status(
            " ",
            &format!(
                "{} ({} {} @ {})",
                spec.name,
                spec.source_kind(),
                spec.source_locator(),
                spec.version_constraint()
            ),
        );
    }
    if project.build_rule().command_for(settings.platform()).is_none() {
        output.status(status::WARNING, "No build rule for this platform");
    }

    Ok(specs)
}

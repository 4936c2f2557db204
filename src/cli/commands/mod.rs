//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod cache;
pub mod check;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::cli::output::OutputConfig;
use crate::core::global_config::GlobalConfig;
use crate::error::RaftError;
use crate::infra::dirs::RaftDirs;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch dependencies and build the project
    Build(BuildArgs),

    /// Validate the project and its dependency specs without fetching
    Check(TargetArgs),

    /// Manage the dependency cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

/// Target selection shared by `build` and `check`
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Target platform (defaults to the host)
    #[arg(long)]
    pub platform: Option<String>,

    /// Target architecture (defaults to the host)
    #[arg(long)]
    pub arch: Option<String>,
}

/// Arguments of `raft build`
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Target platform (defaults to the host)
    #[arg(long)]
    pub platform: Option<String>,

    /// Target architecture (defaults to the host)
    #[arg(long)]
    pub arch: Option<String>,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Abort the build after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Fail if raft.lock would change
    #[arg(long)]
    pub locked: bool,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache location and size
    Info,

    /// Remove cached dependencies
    Clean {
        /// Only remove leftover in-progress fetches
        #[arg(long)]
        staging: bool,
    },
}

/// User directories and global configuration
pub(crate) fn load_environment() -> Result<(RaftDirs, GlobalConfig), RaftError> {
    let dirs = RaftDirs::new();
    let config = GlobalConfig::load(&dirs)?;
    Ok((dirs, config))
}

impl Commands {
    /// Execute the command
    pub async fn run(self, output: &OutputConfig) -> Result<()> {
        match self {
            Self::Build(args) => {
                let current_dir = std::env::current_dir().map_err(RaftError::Io)?;
                build::execute(&current_dir, args, output).await?;
            }
            Self::Check(args) => {
                let current_dir = std::env::current_dir().map_err(RaftError::Io)?;
                check::execute(&current_dir, &args, output)?;
            }
            Self::Cache { command } => match command {
                CacheCommands::Info => cache::execute_info(output)?,
                CacheCommands::Clean { staging } => cache::execute_clean(staging, output)?,
            },
        }
        Ok(())
    }
}

//! Raft - dependency-aware build orchestrator
//!
//! This library resolves the dependencies declared in a project's `raft.toml`
//! for a target platform and architecture, fetches them concurrently into a
//! shared cache, and runs the project's build once they are all available.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Build logic: settings, projects, dependencies, fetching, building
//! - [`infra`] - Infrastructure layer (network, filesystem, git, processes)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

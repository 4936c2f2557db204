//! Core build logic
//!
//! Settings resolution, project and manifest loading, dependency specs, the
//! fetch engine and its cache, hooks, build execution, and the orchestrator
//! tying them together. Processes, network and git live in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`build_config`] - Platform/architecture normalization
//! - [`project`] - Project discovery and loading
//! - [`manifest`] - Manifest (raft.toml) parsing
//! - [`dependency`] - Dependency spec validation
//! - [`lock`] - Lock file handling
//! - [`cache`] - On-disk dependency cache
//! - [`fetch`] - Dependency fetch engine
//! - [`hooks`] - Build hooks
//! - [`build_env`] - Build environment setup
//! - [`executor`] - Build execution
//! - [`orchestrator`] - Build orchestration
//! - [`global_config`] - Global configuration management

pub mod build_config;
pub mod build_env;
pub mod cache;
pub mod dependency;
pub mod executor;
pub mod fetch;
pub mod global_config;
pub mod hooks;
pub mod lock;
pub mod manifest;
pub mod orchestrator;
pub mod project;

//! Infrastructure layer
//!
//! Handles I/O operations: network, filesystem, git, and external processes.

pub mod dirs;
pub mod download;
pub mod filesystem;
pub mod git;
pub mod local;
pub mod registry;
pub mod shell;

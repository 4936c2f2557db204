//! Raft CLI - dependency-aware build orchestrator
//!
//! Entry point for the raft command-line application.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use raft::cli::output::{display_error, exit_code};
use raft::cli::Cli;

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };

    // RUST_LOG wins over the verbosity flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            display_error(&e);
            ExitCode::from(exit_code(&e))
        }
    }
}

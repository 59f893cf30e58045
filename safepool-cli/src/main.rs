//! ## safepool-cli
//! **Command-line front end for the deterministic memory pool**
//!
//! Configuration is loaded once and logging installed before any
//! subcommand runs.

use clap::Parser;

mod commands;
mod error;

use commands::Cli;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    commands::run_command(cli)
}

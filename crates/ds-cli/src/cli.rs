//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Ducksearch - SQL-defined search reports over Parquet artifacts
#[derive(Parser, Debug)]
#[command(name = "ducksearch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ducksearch HTTP server
    Serve(ServeArgs),

    /// Statically validate every report under a root
    Lint(LintArgs),
}

/// Arguments for the serve command
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Ducksearch root directory (config.toml, reports/, cache/)
    #[arg(long)]
    pub root: PathBuf,

    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Worker threads; 0 uses the runtime default
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Development mode: poll report files for changes
    #[arg(long)]
    pub dev: bool,
}

/// Arguments for the lint command
#[derive(Args, Debug)]
pub struct LintArgs {
    /// Ducksearch root directory
    #[arg(long)]
    pub root: PathBuf,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;

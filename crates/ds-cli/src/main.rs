//! ducksearch CLI - serve and lint annotated report roots

use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(if cli.global.verbose { "debug" } else { "info" }),
    )
    .init();

    let result = match &cli.command {
        Commands::Serve(args) => commands::serve::execute(args),
        Commands::Lint(args) => commands::lint::execute(args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

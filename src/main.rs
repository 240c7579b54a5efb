mod audit;
mod cli;
mod commands;
mod dedup;
mod error;
mod eval;
mod labeled_rows;
mod manifest;
mod model;
mod plan;
mod taxonomy;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Merge(args) => commands::merge::run(args),
        Commands::Dedupe(args) => commands::dedupe::run(args),
        Commands::Sync(args) => commands::sync::run(args),
        Commands::Resolve(args) => commands::resolve::run(args),
        Commands::Reopen(args) => commands::reopen::run(args),
        Commands::Evaluate(args) => commands::evaluate::run(args),
        Commands::Compare(args) => commands::compare::run(args),
        Commands::Plan(args) => commands::plan::run(args),
        Commands::Audit(args) => commands::audit::run(args),
        Commands::Status(args) => commands::status::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

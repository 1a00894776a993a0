//! fieldsync CLI - offline-first records for field operations
//!
//! Every write lands in the local store first and is queued for the
//! remote service; `fieldsync sync` or `fieldsync watch` pushes it.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::common::Context;
use crate::commands::completions::run_completions;
use crate::commands::customer::run_customer;
use crate::commands::job::run_job;
use crate::commands::queue::{run_purge, run_queue};
use crate::commands::sync::{run_status, run_sync, run_sync_conflicts};
use crate::commands::watch::run_watch;
use crate::commands::worker::run_worker;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "fieldsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = Context::resolve(cli.db_path, cli.config, cli.offline);

    match cli.command {
        Commands::Customer { command } => run_customer(command, &context).await?,
        Commands::Job { command } => run_job(command, &context).await?,
        Commands::Worker { command } => run_worker(command, &context).await?,
        Commands::Sync { command: None } => run_sync(&context).await?,
        Commands::Sync {
            command: Some(SyncCommands::Conflicts { limit, json }),
        } => run_sync_conflicts(limit, json, &context).await?,
        Commands::Status { json } => run_status(json, &context).await?,
        Commands::Queue { command } => run_queue(command, &context).await?,
        Commands::Purge => run_purge(&context).await?,
        Commands::Watch => run_watch(&context).await?,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
    }

    Ok(())
}

use crate::cli::QueueCommands;
use crate::commands::common::{
    format_failed_lines, format_mutation_lines, open_engine, print_json, Context,
};
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context).await?;

    match command {
        QueueCommands::List { json } => {
            let pending = engine.pending_mutations().await?;
            if json {
                print_json(&pending)?;
            } else if pending.is_empty() {
                println!("Queue is empty.");
            } else {
                for line in format_mutation_lines(&pending) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::Failed { limit, json } => {
            let failed = engine.failed_mutations(limit).await?;
            if json {
                print_json(&failed)?;
            } else if failed.is_empty() {
                println!("No failed changes.");
            } else {
                for line in format_failed_lines(&failed) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::Clear { failed: true } => {
            let removed = engine.clear_failed().await?;
            println!("Cleared {removed} failed change(s)");
        }
        QueueCommands::Clear { failed: false } => {
            let removed = engine.clear_queue().await?;
            println!("Discarded {removed} queued change(s)");
        }
    }

    Ok(())
}

pub async fn run_purge(context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    let purged = engine.purge_expired().await?;
    println!("Purged {purged} expired record(s)");
    Ok(())
}

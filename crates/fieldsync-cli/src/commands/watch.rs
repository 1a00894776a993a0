use crate::commands::common::{now_ms, open_engine, Context};
use crate::commands::sync::format_status;
use crate::error::CliError;

/// Keep syncing in the background until Ctrl-C.
pub async fn run_watch(context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    if !engine.controller().gateway().is_connected() {
        return Err(CliError::SyncNotConfigured);
    }

    engine.start_background();
    println!("Syncing in the background; press Ctrl-C to stop");

    let interrupted = tokio::signal::ctrl_c().await;
    engine.shutdown().await;
    interrupted?;

    for line in format_status(&engine.sync_status().await?, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

use anyhow::{Context, Result};
use brewsync_config::{SourceKind, SyncConfig};
use brewsync_core::CheckpointStore;
use colored::Colorize;
use dialoguer::Confirm;

use crate::store::Checkpoints;

pub async fn cmd_reset(config: SyncConfig, kind: SourceKind, yes: bool) -> Result<()> {
    if !yes {
        let backfill_days = config.source(kind).backfill_days;
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete the {} checkpoint? The next run will backfill {} days.",
                kind, backfill_days
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborting.");
            return Ok(());
        }
    }

    let store = Checkpoints::open(&config).await?;
    let result = store.clear(kind.as_str()).await;
    store.close().await;
    result.with_context(|| format!("Failed to clear the {} checkpoint", kind))?;

    println!("{}", format!("Checkpoint for {} cleared.", kind).green());
    Ok(())
}

use anyhow::{Context, Result};
use brewsync_config::{SourceKind, SyncConfig};
use brewsync_core::{CheckpointStore, SyncCheckpoint};
use colored::Colorize;

use crate::store::Checkpoints;

pub async fn cmd_status(config: SyncConfig) -> Result<()> {
    let store = Checkpoints::open(&config).await?;
    let checkpoints = store.list().await.context("Failed to read checkpoints");
    let description = store.describe();
    store.close().await;
    let checkpoints = checkpoints?;

    println!("\nSync Status ({}):", description);
    println!(
        "{:<12} {:<27} {:<27} {:<9} {:>9} {:>7}",
        "Source", "Next start", "Last run", "Mode", "Records", "Failed"
    );
    println!("{:-<96}", "");

    for kind in SourceKind::ALL {
        let enabled = config.source(kind).enabled;
        let name = format!("{:<12}", kind.as_str());
        let name = if enabled { name.normal() } else { name.dimmed() };

        match find(&checkpoints, kind) {
            Some(cp) => println!("{} {}", name, row(cp)),
            None => println!("{} {}", name, "never synced".yellow()),
        }
    }

    let unknown: Vec<_> = checkpoints
        .iter()
        .filter(|(source, _)| source.parse::<SourceKind>().is_err())
        .map(|(source, _)| source.as_str())
        .collect();
    if !unknown.is_empty() {
        println!("\nOther checkpoints: {}", unknown.join(", "));
    }

    println!();
    Ok(())
}

fn find(checkpoints: &[(String, SyncCheckpoint)], kind: SourceKind) -> Option<&SyncCheckpoint> {
    checkpoints
        .iter()
        .find(|(source, _)| source == kind.as_str())
        .map(|(_, cp)| cp)
}

fn row(cp: &SyncCheckpoint) -> String {
    let last_run = cp
        .last_run_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    let failed = format!("{:>7}", cp.last_result.failed);
    let failed = if cp.last_result.failed > 0 {
        failed.red()
    } else {
        failed.green()
    };

    format!(
        "{:<27} {:<27} {:<9} {:>9} {}",
        cp.next_start.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        last_run,
        cp.mode.as_str(),
        cp.last_result.count,
        failed
    )
}

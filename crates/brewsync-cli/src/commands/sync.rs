use anyhow::{Context, Result};
use brewsync_config::{SourceKind, SyncConfig};
use brewsync_core::{RunSummary, SyncEngine, SyncOptions, SyncSource};
use brewsync_pg::PgSink;
use brewsync_square::{
    CatalogSource, CustomersSource, OrdersSource, PaymentsSource, SquareClient, SquareClientConfig,
};
use chrono::Utc;
use colored::Colorize;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::store::Checkpoints;

pub async fn cmd_sync(config: SyncConfig, kind: SourceKind, full: bool) -> Result<()> {
    let summary = sync_source(&config, kind, full).await?;
    print_summary(&summary);
    Ok(())
}

pub async fn cmd_sync_all(config: SyncConfig) -> Result<()> {
    let results = run_all(&config).await;
    let failed = report(&results);
    if failed > 0 {
        anyhow::bail!("{} of {} sources failed", failed, results.len());
    }
    Ok(())
}

/// Run one pass of every enabled source, each in its own task.
pub(crate) async fn run_all(config: &SyncConfig) -> Vec<(SourceKind, Result<RunSummary>)> {
    let mut tasks = JoinSet::new();
    for settings in config.enabled_sources() {
        let config = config.clone();
        let kind = settings.kind;
        tasks.spawn(async move { (kind, sync_source(&config, kind, false).await) });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => error!(error = %e, "Sync task panicked"),
        }
    }
    results.sort_by_key(|(kind, _)| kind.as_str());
    results
}

/// Print each result. Returns the number of failed sources.
pub(crate) fn report(results: &[(SourceKind, Result<RunSummary>)]) -> usize {
    let mut failed = 0;
    for (kind, result) in results {
        match result {
            Ok(summary) => print_summary(summary),
            Err(e) => {
                failed += 1;
                println!("{} {}: {:#}", "✗".red(), kind.as_str().bold(), e);
            }
        }
    }
    failed
}

/// One pass of one source: Square client, Postgres sink and checkpoint
/// store are opened for the run and closed afterwards.
pub(crate) async fn sync_source(
    config: &SyncConfig,
    kind: SourceKind,
    full: bool,
) -> Result<RunSummary> {
    let settings = config.source(kind);
    let client = SquareClient::new(SquareClientConfig::from_config(
        &config.square,
        config.access_token()?,
    ))
    .context("Failed to build Square client")?;

    let sink = PgSink::connect(&config.connection_string()?)
        .await
        .context("Failed to connect to Postgres")?;
    let checkpoints = Checkpoints::open(config).await?;
    let options = settings.sync_options(config.analytics.enabled, full);

    info!(
        source = kind.as_str(),
        full,
        checkpoints = %checkpoints.describe(),
        "Running sync"
    );

    let result = match kind {
        SourceKind::Orders => {
            run_engine(&OrdersSource::new(client, &settings), &sink, &checkpoints, options).await
        }
        SourceKind::Payments => {
            run_engine(&PaymentsSource::new(client, &settings), &sink, &checkpoints, options).await
        }
        SourceKind::Catalog => {
            run_engine(&CatalogSource::new(client, &settings), &sink, &checkpoints, options).await
        }
        SourceKind::Customers => {
            run_engine(&CustomersSource::new(client, &settings), &sink, &checkpoints, options)
                .await
        }
    };

    checkpoints.close().await;
    sink.close().await;

    result.with_context(|| format!("Sync failed for {}", kind))
}

async fn run_engine<S: SyncSource>(
    source: &S,
    sink: &PgSink,
    checkpoints: &Checkpoints,
    options: SyncOptions,
) -> brewsync_core::Result<RunSummary> {
    SyncEngine::new(source, sink, checkpoints, options)
        .run(Utc::now())
        .await
}

fn print_summary(summary: &RunSummary) {
    let stats = &summary.stats;
    println!(
        "{} {} ({}): {} records over {} pages, {} upserted, {} skipped, {} failed",
        "✓".green(),
        summary.source.bold(),
        summary.window.mode.as_str(),
        stats.count,
        stats.pages,
        stats.upserted,
        stats.skipped,
        stats.failed,
    );
    println!(
        "  next run starts from {}",
        summary.checkpoint.next_start.to_rfc3339()
    );
    if !summary.checkpoint_saved {
        println!(
            "  {}",
            "checkpoint was not saved; the next run will repeat this window".yellow()
        );
    }
}

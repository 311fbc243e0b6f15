use std::fs;

use anyhow::{Context, Result};
use brewsync_config::{CheckpointBackend, SyncConfig};
use brewsync_pg::{PgSink, CHECKPOINT_TABLE};
use colored::Colorize;

pub async fn cmd_setup(config: SyncConfig) -> Result<()> {
    println!("Setting up brewsync database tables...\n");

    println!("The following tables will be created:");
    println!("  - transactions       - one row per Square payment");
    println!("  - transaction_items  - line items of each payment");
    println!("  - orders             - Square orders");
    println!("  - catalog_objects    - items, variations, categories and more");
    println!("  - customers          - customer directory");
    println!("  - analytics          - hourly analytics documents");
    println!("  - {:<18} - sync checkpoints and run locks", CHECKPOINT_TABLE);
    println!("and the daily_sales and hourly_sales views.");
    println!();

    let sink = PgSink::connect(&config.connection_string()?)
        .await
        .context("Failed to connect to Postgres")?;
    let report = sink.setup().await.context("Failed to create tables");
    sink.close().await;
    let report = report?;

    if report.hypertable {
        println!("{}", "transactions is a TimescaleDB hypertable.".green());
    } else {
        println!(
            "{}",
            "TimescaleDB not available: transactions uses a plain created_at index.".yellow()
        );
    }

    if config.checkpoints.backend == CheckpointBackend::File {
        fs::create_dir_all(&config.checkpoints.dir).with_context(|| {
            format!(
                "Failed to create checkpoint directory {}",
                config.checkpoints.dir.display()
            )
        })?;
        println!("Checkpoints will be written to {}", config.checkpoints.dir.display());
    }

    println!("{}", "Database tables created successfully!".green());
    println!("\nNext steps:");
    println!("  1. Run: brewsync sync-all");
    println!("  2. Run: brewsync watch\n");

    Ok(())
}

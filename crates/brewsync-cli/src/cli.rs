use std::path::PathBuf;

use brewsync_config::SourceKind;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "brewsync")]
#[command(about = "Sync Square sales data into Postgres")]
#[command(version)]
pub struct Cli {
    /// Path to brewsync.toml
    #[arg(short, long, global = true, default_value = "brewsync.toml")]
    pub config: PathBuf,

    /// Environment to load (loads .env.{ENV} instead of .env)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create sink tables, reporting views and the checkpoint table
    Setup,

    /// Run one sync pass for a single source
    Sync {
        /// orders, payments, catalog or customers
        source: SourceKind,

        /// Ignore the stored checkpoint and backfill
        #[arg(long)]
        full: bool,
    },

    /// Run one sync pass for every enabled source, concurrently
    SyncAll,

    /// Repeat sync-all on an interval until interrupted
    Watch {
        /// Seconds between passes
        #[arg(long, default_value = "300")]
        interval_secs: u64,
    },

    /// Show stored checkpoints
    Status,

    /// Delete a source's checkpoint so its next run backfills
    Reset {
        source: SourceKind,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

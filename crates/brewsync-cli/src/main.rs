use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod env;
mod store;

use brewsync_config::SyncConfig;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env (or .env.{ENV}) before anything reads the environment
    env::load_dotenv_from_ancestors(cli.env.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("brewsync=info")),
        )
        .init();

    let config = SyncConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Setup => commands::cmd_setup(config).await,
        Commands::Sync { source, full } => commands::cmd_sync(config, source, full).await,
        Commands::SyncAll => commands::cmd_sync_all(config).await,
        Commands::Watch { interval_secs } => commands::cmd_watch(config, interval_secs).await,
        Commands::Status => commands::cmd_status(config).await,
        Commands::Reset { source, yes } => commands::cmd_reset(config, source, yes).await,
    }
}

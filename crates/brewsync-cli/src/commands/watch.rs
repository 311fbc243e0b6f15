use std::time::Duration;

use anyhow::Result;
use brewsync_config::SyncConfig;
use tracing::{info, warn};

use super::sync::{report, run_all};

/// Run sync-all, sleep, repeat. Ctrl-C stops the loop between passes.
pub async fn cmd_watch(config: SyncConfig, interval_secs: u64) -> Result<()> {
    if interval_secs == 0 {
        anyhow::bail!("--interval-secs must be greater than zero");
    }
    let interval = Duration::from_secs(interval_secs);
    info!(interval_secs, "Watching Square for changes");

    let mut pass: u64 = 0;
    loop {
        pass += 1;
        let results = run_all(&config).await;
        let failed = report(&results);
        if failed > 0 {
            warn!(pass, failed, "Sync pass finished with failures");
        } else {
            info!(pass, sources = results.len(), "Sync pass finished");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
        }
    }

    Ok(())
}

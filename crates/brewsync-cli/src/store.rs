use std::future::Future;

use anyhow::{Context, Result};
use brewsync_config::{CheckpointBackend, SyncConfig};
use brewsync_core::{CheckpointStore, FileCheckpointStore, SyncCheckpoint};
use brewsync_pg::PostgresCheckpointStore;

/// The checkpoint store selected by `[checkpoints] backend`.
pub enum Checkpoints {
    File(FileCheckpointStore),
    Postgres(PostgresCheckpointStore),
}

impl Checkpoints {
    pub async fn open(config: &SyncConfig) -> Result<Self> {
        let stale_secs = config.checkpoints.lock_stale_secs;
        match config.checkpoints.backend {
            CheckpointBackend::File => Ok(Checkpoints::File(
                FileCheckpointStore::new(&config.checkpoints.dir)
                    .with_lock_stale_after(chrono::Duration::seconds(stale_secs)),
            )),
            CheckpointBackend::Postgres => {
                let store = PostgresCheckpointStore::connect(&config.connection_string()?)
                    .await
                    .context("Failed to connect to the Postgres checkpoint store")?;
                Ok(Checkpoints::Postgres(store.with_lock_stale_secs(stale_secs)))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Checkpoints::File(store) => format!("file ({})", store.dir().display()),
            Checkpoints::Postgres(_) => "postgres".to_string(),
        }
    }

    pub async fn close(self) {
        if let Checkpoints::Postgres(store) = self {
            store.close().await;
        }
    }
}

impl CheckpointStore for Checkpoints {
    fn load(&self, source: &str) -> impl Future<Output = Option<SyncCheckpoint>> + Send {
        async move {
            match self {
                Checkpoints::File(s) => s.load(source).await,
                Checkpoints::Postgres(s) => s.load(source).await,
            }
        }
    }

    fn save(
        &self,
        source: &str,
        checkpoint: &SyncCheckpoint,
    ) -> impl Future<Output = brewsync_core::Result<()>> + Send {
        async move {
            match self {
                Checkpoints::File(s) => s.save(source, checkpoint).await,
                Checkpoints::Postgres(s) => s.save(source, checkpoint).await,
            }
        }
    }

    fn clear(&self, source: &str) -> impl Future<Output = brewsync_core::Result<()>> + Send {
        async move {
            match self {
                Checkpoints::File(s) => s.clear(source).await,
                Checkpoints::Postgres(s) => s.clear(source).await,
            }
        }
    }

    fn list(
        &self,
    ) -> impl Future<Output = brewsync_core::Result<Vec<(String, SyncCheckpoint)>>> + Send {
        async move {
            match self {
                Checkpoints::File(s) => s.list().await,
                Checkpoints::Postgres(s) => s.list().await,
            }
        }
    }

    fn acquire(&self, source: &str) -> impl Future<Output = brewsync_core::Result<bool>> + Send {
        async move {
            match self {
                Checkpoints::File(s) => s.acquire(source).await,
                Checkpoints::Postgres(s) => s.acquire(source).await,
            }
        }
    }

    fn refresh(&self, source: &str) -> impl Future<Output = brewsync_core::Result<bool>> + Send {
        async move {
            match self {
                Checkpoints::File(s) => s.refresh(source).await,
                Checkpoints::Postgres(s) => s.refresh(source).await,
            }
        }
    }

    fn release(&self, source: &str) -> impl Future<Output = brewsync_core::Result<()>> + Send {
        async move {
            match self {
                Checkpoints::File(s) => s.release(source).await,
                Checkpoints::Postgres(s) => s.release(source).await,
            }
        }
    }
}

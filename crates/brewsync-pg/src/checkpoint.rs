//! Checkpoints stored in the `__brewsync_checkpoints` table.
//!
//! The run lock is the row's `status` column plus the `owner` token of the
//! store that set it. A `running` row whose `locked_at` has not been
//! refreshed within the stale threshold is treated as abandoned and can be
//! taken over.

use std::future::Future;

use brewsync_core::{CheckpointStore, Error, Result, SyncCheckpoint};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connect::PgConnection;
use crate::error::{PgError, PgResult};
use crate::schema;

const DEFAULT_LOCK_STALE_SECS: i64 = 3600;

const ACQUIRE: &str = r#"
    INSERT INTO __brewsync_checkpoints (source, status, owner, locked_at, updated_at)
    VALUES ($1, 'running', $3, NOW(), NOW())
    ON CONFLICT (source) DO UPDATE SET
        status = 'running',
        owner = EXCLUDED.owner,
        locked_at = NOW(),
        updated_at = NOW()
    WHERE __brewsync_checkpoints.status <> 'running'
        OR __brewsync_checkpoints.locked_at IS NULL
        OR __brewsync_checkpoints.locked_at < NOW() - ($2::BIGINT * INTERVAL '1 second')
    RETURNING source
"#;

const REFRESH: &str = r#"
    UPDATE __brewsync_checkpoints SET locked_at = NOW()
    WHERE source = $1 AND status = 'running' AND owner = $2
"#;

const RELEASE: &str = r#"
    UPDATE __brewsync_checkpoints SET status = 'idle', owner = NULL, locked_at = NULL, updated_at = NOW()
    WHERE source = $1 AND owner = $2
"#;

const SAVE: &str = r#"
    INSERT INTO __brewsync_checkpoints (source, checkpoint, updated_at)
    VALUES ($1, $2, NOW())
    ON CONFLICT (source) DO UPDATE SET
        checkpoint = EXCLUDED.checkpoint,
        updated_at = NOW()
"#;

fn checkpoint_error(e: impl Into<PgError>) -> Error {
    Error::Checkpoint(e.into().to_string())
}

pub struct PostgresCheckpointStore {
    conn: Mutex<PgConnection>,
    lock_stale_secs: i64,
    owner: String,
}

impl PostgresCheckpointStore {
    /// Connect and make sure the checkpoint table exists.
    pub async fn connect(connection_string: &str) -> PgResult<Self> {
        let conn = PgConnection::connect(connection_string).await?;
        schema::ensure_checkpoint_table(conn.client()).await?;
        Ok(Self {
            conn: Mutex::new(conn),
            lock_stale_secs: DEFAULT_LOCK_STALE_SECS,
            owner: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn with_lock_stale_secs(mut self, secs: i64) -> Self {
        self.lock_stale_secs = secs;
        self
    }

    pub async fn close(self) {
        self.conn.into_inner().close().await;
    }

    async fn read(&self, source: &str) -> PgResult<Option<serde_json::Value>> {
        let conn = self.conn.lock().await;
        let row = conn
            .client()
            .query_opt(
                "SELECT checkpoint FROM __brewsync_checkpoints WHERE source = $1",
                &[&source],
            )
            .await?;
        Ok(row.and_then(|r| r.get::<_, Option<serde_json::Value>>(0)))
    }

    async fn write(&self, source: &str, checkpoint: &SyncCheckpoint) -> PgResult<()> {
        let value = serde_json::to_value(checkpoint)?;
        let conn = self.conn.lock().await;
        conn.client().execute(SAVE, &[&source, &value]).await?;
        debug!(source, next_start = %checkpoint.next_start, "Saved checkpoint");
        Ok(())
    }

    async fn remove(&self, source: &str) -> PgResult<()> {
        let conn = self.conn.lock().await;
        conn.client()
            .execute(
                "UPDATE __brewsync_checkpoints SET checkpoint = NULL, updated_at = NOW() \
                 WHERE source = $1",
                &[&source],
            )
            .await?;
        Ok(())
    }

    async fn read_all(&self) -> PgResult<Vec<(String, SyncCheckpoint)>> {
        let conn = self.conn.lock().await;
        let rows = conn
            .client()
            .query(
                "SELECT source, checkpoint FROM __brewsync_checkpoints \
                 WHERE checkpoint IS NOT NULL ORDER BY source",
                &[],
            )
            .await?;

        let mut all = Vec::with_capacity(rows.len());
        for row in rows {
            let source: String = row.get(0);
            let value: serde_json::Value = row.get(1);
            match serde_json::from_value(value) {
                Ok(checkpoint) => all.push((source, checkpoint)),
                Err(e) => warn!(source, error = %e, "Skipping unreadable checkpoint"),
            }
        }
        Ok(all)
    }

    async fn try_lock(&self, source: &str) -> PgResult<bool> {
        let conn = self.conn.lock().await;
        let row = conn
            .client()
            .query_opt(ACQUIRE, &[&source, &self.lock_stale_secs, &self.owner])
            .await?;
        Ok(row.is_some())
    }

    async fn heartbeat(&self, source: &str) -> PgResult<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.client().execute(REFRESH, &[&source, &self.owner]).await?;
        Ok(updated == 1)
    }

    async fn unlock(&self, source: &str) -> PgResult<()> {
        let conn = self.conn.lock().await;
        let updated = conn.client().execute(RELEASE, &[&source, &self.owner]).await?;
        if updated == 0 {
            warn!(source, "Run lock is held by another run, leaving it");
        }
        Ok(())
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn load(&self, source: &str) -> impl Future<Output = Option<SyncCheckpoint>> + Send {
        async move {
            let value = match self.read(source).await {
                Ok(value) => value?,
                Err(e) => {
                    warn!(source, error = %e, "Failed to read checkpoint, starting fresh");
                    return None;
                }
            };
            match serde_json::from_value(value) {
                Ok(checkpoint) => Some(checkpoint),
                Err(e) => {
                    warn!(source, error = %e, "Unreadable checkpoint, starting fresh");
                    None
                }
            }
        }
    }

    fn save(
        &self,
        source: &str,
        checkpoint: &SyncCheckpoint,
    ) -> impl Future<Output = Result<()>> + Send {
        async move { self.write(source, checkpoint).await.map_err(checkpoint_error) }
    }

    fn clear(&self, source: &str) -> impl Future<Output = Result<()>> + Send {
        async move { self.remove(source).await.map_err(checkpoint_error) }
    }

    fn list(&self) -> impl Future<Output = Result<Vec<(String, SyncCheckpoint)>>> + Send {
        async move { self.read_all().await.map_err(checkpoint_error) }
    }

    fn acquire(&self, source: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { self.try_lock(source).await.map_err(checkpoint_error) }
    }

    fn refresh(&self, source: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { self.heartbeat(source).await.map_err(checkpoint_error) }
    }

    fn release(&self, source: &str) -> impl Future<Output = Result<()>> + Send {
        async move { self.unlock(source).await.map_err(checkpoint_error) }
    }
}

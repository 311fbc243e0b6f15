//! Checkpoint persistence and the per-source run lock.
//!
//! Loading fails open: a missing or unreadable checkpoint is reported as
//! `None`, which makes the next run a full backfill. Only one run per source
//! may hold the lock, so a store never has two concurrent writers for the
//! same key.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::SyncCheckpoint;

/// Durable storage for one checkpoint per source, plus its run lock.
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint for a source. Never fails.
    fn load(&self, source: &str) -> impl Future<Output = Option<SyncCheckpoint>> + Send;

    /// Overwrite the checkpoint for a source.
    fn save(
        &self,
        source: &str,
        checkpoint: &SyncCheckpoint,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove the checkpoint so the next run backfills.
    fn clear(&self, source: &str) -> impl Future<Output = Result<()>> + Send;

    /// All stored checkpoints, sorted by source name.
    fn list(&self) -> impl Future<Output = Result<Vec<(String, SyncCheckpoint)>>> + Send;

    /// Try to take the run lock. `false` means another run holds it.
    fn acquire(&self, source: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Push back the staleness deadline of a lock this store holds. `false`
    /// means the lock is no longer ours.
    fn refresh(&self, source: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Drop the run lock if this store still holds it.
    fn release(&self, source: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Contents of a lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    #[serde(default)]
    owner: String,
    acquired_at: DateTime<Utc>,
}

/// A guard left behind by a crashed takeover is removed after this long.
const GUARD_STALE_SECS: u64 = 30;
const GUARD_ATTEMPTS: u32 = 50;
const GUARD_RETRY: std::time::Duration = std::time::Duration::from_millis(10);

/// Checkpoints as `<dir>/<source>.checkpoint.json`, locks as `<dir>/<source>.lock`.
///
/// A lock file is published with its content in one step (hard link of a
/// private temp file), so it is never seen empty. Each store instance has
/// its own owner token; refresh and release only touch a lock carrying that
/// token. Replacing or removing an existing lock happens under
/// `<source>.lock.guard`, which serializes stale takeovers with refresh and
/// release.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    lock_stale_after: Duration,
    owner: String,
}

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_stale_after: Duration::hours(1),
            owner: Uuid::new_v4().to_string(),
        }
    }

    /// Locks not refreshed for this long are assumed to belong to a crashed
    /// run.
    pub fn with_lock_stale_after(mut self, stale_after: Duration) -> Self {
        self.lock_stale_after = stale_after;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}{}", source, CHECKPOINT_SUFFIX))
    }

    pub fn lock_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", source))
    }

    fn guard_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}.lock.guard", source))
    }

    fn read(&self, source: &str) -> Option<SyncCheckpoint> {
        let path = self.checkpoint_path(source);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(source, path = %path.display(), "No checkpoint file");
                return None;
            }
            Err(e) => {
                warn!(source, path = %path.display(), error = %e, "Failed to read checkpoint, starting from backfill");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!(source, path = %path.display(), error = %e, "Malformed checkpoint, starting from backfill");
                None
            }
        }
    }

    fn write(&self, source: &str, checkpoint: &SyncCheckpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.checkpoint_path(source);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        debug!(source, path = %path.display(), "Saved checkpoint");
        Ok(())
    }

    fn remove(&self, source: &str) -> Result<()> {
        remove_if_exists(&self.checkpoint_path(source))
    }

    fn read_all(&self) -> Result<Vec<(String, SyncCheckpoint)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoints = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(source) = name.strip_suffix(CHECKPOINT_SUFFIX) {
                if let Some(checkpoint) = self.read(source) {
                    checkpoints.push((source.to_string(), checkpoint));
                }
            }
        }
        checkpoints.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(checkpoints)
    }

    fn lock_info(&self) -> LockInfo {
        LockInfo {
            pid: std::process::id(),
            owner: self.owner.clone(),
            acquired_at: Utc::now(),
        }
    }

    fn is_stale(&self, held: &HeldLock) -> bool {
        Utc::now() - held.since > self.lock_stale_after
    }

    fn try_lock(&self, source: &str) -> Result<bool> {
        fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(source);

        if publish(&self.dir, &path, &self.lock_info())? {
            return Ok(true);
        }
        match read_lock(&path)? {
            Some(held) if !self.is_stale(&held) => return Ok(false),
            _ => {}
        }

        // Re-check under the guard: another run may have replaced the
        // stale lock since it was read.
        let taken = self.with_guard(source, 1, || {
            if let Some(held) = read_lock(&path)? {
                if !self.is_stale(&held) {
                    return Ok(false);
                }
                warn!(
                    source,
                    path = %path.display(),
                    held_by = held.info.as_ref().map(|i| i.pid),
                    since = %held.since,
                    "Taking over stale run lock"
                );
                remove_if_exists(&path)?;
            }
            publish(&self.dir, &path, &self.lock_info())
        })?;
        Ok(taken.unwrap_or(false))
    }

    fn heartbeat(&self, source: &str) -> Result<bool> {
        let path = self.lock_path(source);
        let refreshed = self.with_guard(source, GUARD_ATTEMPTS, || {
            if !self.owns(&path)? {
                return Ok(false);
            }
            let tmp = temp_path(&self.dir);
            fs::write(&tmp, serde_json::to_vec(&self.lock_info())?)?;
            fs::rename(&tmp, &path)?;
            Ok(true)
        })?;

        match refreshed {
            Some(refreshed) => Ok(refreshed),
            None => {
                // A takeover is in progress; only a stale lock can be taken
                // over, so report whether it is still ours.
                self.owns(&path)
            }
        }
    }

    fn unlock(&self, source: &str) -> Result<()> {
        let path = self.lock_path(source);
        let released = self.with_guard(source, GUARD_ATTEMPTS, || {
            if self.owns(&path)? {
                remove_if_exists(&path)?;
            } else {
                warn!(source, path = %path.display(), "Run lock is held by another run, leaving it");
            }
            Ok(())
        })?;

        if released.is_none() {
            warn!(source, "Lock guard busy, leaving run lock to expire");
        }
        Ok(())
    }

    fn owns(&self, path: &Path) -> Result<bool> {
        Ok(read_lock(path)?
            .and_then(|held| held.info)
            .is_some_and(|info| info.owner == self.owner))
    }

    /// Run `f` while holding the source's guard file. `None` when the guard
    /// stayed busy for every attempt.
    fn with_guard<T>(
        &self,
        source: &str,
        attempts: u32,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<Option<T>> {
        let guard = self.guard_path(source);

        for attempt in 0..attempts {
            if publish(&self.dir, &guard, &self.lock_info())? {
                let result = f();
                remove_if_exists(&guard)?;
                return result.map(Some);
            }

            let abandoned = fs::metadata(&guard)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age.as_secs() > GUARD_STALE_SECS);
            if abandoned {
                warn!(source, path = %guard.display(), "Removing abandoned lock guard");
                remove_if_exists(&guard)?;
            } else if attempt + 1 < attempts {
                std::thread::sleep(GUARD_RETRY);
            }
        }
        Ok(None)
    }
}

/// A lock file as found on disk. Unparseable content ages by mtime.
struct HeldLock {
    info: Option<LockInfo>,
    since: DateTime<Utc>,
}

fn read_lock(path: &Path) -> Result<Option<HeldLock>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let info = serde_json::from_slice::<LockInfo>(&content).ok();
    let since = match &info {
        Some(info) => info.acquired_at,
        None => match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        },
    };
    Ok(Some(HeldLock { info, since }))
}

fn temp_path(dir: &Path) -> PathBuf {
    dir.join(format!(".{}.tmp", Uuid::new_v4().simple()))
}

/// Create `path` holding `info`, or `false` if it already exists.
fn publish(dir: &Path, path: &Path, info: &LockInfo) -> Result<bool> {
    let tmp = temp_path(dir);
    fs::write(&tmp, serde_json::to_vec(info)?)?;
    let linked = fs::hard_link(&tmp, path);
    if let Err(e) = fs::remove_file(&tmp) {
        debug!(path = %tmp.display(), error = %e, "Failed to remove lock temp file");
    }

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, source: &str) -> impl Future<Output = Option<SyncCheckpoint>> + Send {
        let checkpoint = self.read(source);
        async move { checkpoint }
    }

    fn save(
        &self,
        source: &str,
        checkpoint: &SyncCheckpoint,
    ) -> impl Future<Output = Result<()>> + Send {
        let result = self.write(source, checkpoint);
        async move { result }
    }

    fn clear(&self, source: &str) -> impl Future<Output = Result<()>> + Send {
        let result = self.remove(source);
        async move { result }
    }

    fn list(&self) -> impl Future<Output = Result<Vec<(String, SyncCheckpoint)>>> + Send {
        let result = self.read_all();
        async move { result }
    }

    fn acquire(&self, source: &str) -> impl Future<Output = Result<bool>> + Send {
        let result = self.try_lock(source);
        async move { result }
    }

    fn refresh(&self, source: &str) -> impl Future<Output = Result<bool>> + Send {
        let result = self.heartbeat(source);
        async move { result }
    }

    fn release(&self, source: &str) -> impl Future<Output = Result<()>> + Send {
        let result = self.unlock(source);
        async move { result }
    }
}

/// In-memory store for tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    state: Arc<Mutex<MemoryCheckpoints>>,
}

#[derive(Default)]
struct MemoryCheckpoints {
    checkpoints: HashMap<String, SyncCheckpoint>,
    locks: HashSet<String>,
    saves: Vec<(String, SyncCheckpoint)>,
    refreshes: usize,
    fail_saves: bool,
    lose_locks: bool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(self, source: &str, checkpoint: SyncCheckpoint) -> Self {
        self.state
            .lock()
            .unwrap()
            .checkpoints
            .insert(source.to_string(), checkpoint);
        self
    }

    /// Make every save fail.
    pub fn failing_saves(self) -> Self {
        self.state.lock().unwrap().fail_saves = true;
        self
    }

    pub fn get(&self, source: &str) -> Option<SyncCheckpoint> {
        self.state.lock().unwrap().checkpoints.get(source).cloned()
    }

    /// Every successful save, in order.
    pub fn saves(&self) -> Vec<(String, SyncCheckpoint)> {
        self.state.lock().unwrap().saves.clone()
    }

    pub fn is_locked(&self, source: &str) -> bool {
        self.state.lock().unwrap().locks.contains(source)
    }

    /// Hold the lock as if another run were in progress.
    pub fn hold_lock(&self, source: &str) {
        self.state.lock().unwrap().locks.insert(source.to_string());
    }

    /// Make every refresh report the lock as taken over.
    pub fn losing_locks(self) -> Self {
        self.state.lock().unwrap().lose_locks = true;
        self
    }

    /// Successful refreshes so far.
    pub fn refreshes(&self) -> usize {
        self.state.lock().unwrap().refreshes
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, source: &str) -> impl Future<Output = Option<SyncCheckpoint>> + Send {
        let checkpoint = self.get(source);
        async move { checkpoint }
    }

    fn save(
        &self,
        source: &str,
        checkpoint: &SyncCheckpoint,
    ) -> impl Future<Output = Result<()>> + Send {
        let mut state = self.state.lock().unwrap();
        let result = if state.fail_saves {
            Err(Error::Checkpoint("simulated save failure".to_string()))
        } else {
            state
                .checkpoints
                .insert(source.to_string(), checkpoint.clone());
            state.saves.push((source.to_string(), checkpoint.clone()));
            Ok(())
        };
        async move { result }
    }

    fn clear(&self, source: &str) -> impl Future<Output = Result<()>> + Send {
        self.state.lock().unwrap().checkpoints.remove(source);
        async { Ok(()) }
    }

    fn list(&self) -> impl Future<Output = Result<Vec<(String, SyncCheckpoint)>>> + Send {
        let mut all: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .checkpoints
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        async move { Ok(all) }
    }

    fn acquire(&self, source: &str) -> impl Future<Output = Result<bool>> + Send {
        let acquired = self.state.lock().unwrap().locks.insert(source.to_string());
        async move { Ok(acquired) }
    }

    fn refresh(&self, source: &str) -> impl Future<Output = Result<bool>> + Send {
        let mut state = self.state.lock().unwrap();
        let held = state.locks.contains(source) && !state.lose_locks;
        if held {
            state.refreshes += 1;
        }
        async move { Ok(held) }
    }

    fn release(&self, source: &str) -> impl Future<Output = Result<()>> + Send {
        self.state.lock().unwrap().locks.remove(source);
        async { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn checkpoint() -> SyncCheckpoint {
        let mut cp = SyncCheckpoint::new(Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap());
        cp.last_result.count = 237;
        cp.last_result.pages = 3;
        cp
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("not-created-yet"));
        assert!(store.load("orders").await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        for content in ["", "{not json", "[]", r#"{"next_start":"yesterday"}"#] {
            fs::write(store.checkpoint_path("orders"), content).unwrap();
            assert!(store.load("orders").await.is_none(), "content: {:?}", content);
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("data"));

        store.save("orders", &checkpoint()).await.unwrap();
        assert_eq!(store.load("orders").await, Some(checkpoint()));
        assert!(!store.checkpoint_path("orders").with_extension("json.tmp").exists());

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "orders");

        store.clear("orders").await.unwrap();
        assert!(store.load("orders").await.is_none());
        store.clear("orders").await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        assert!(store.acquire("orders").await.unwrap());
        assert!(!store.acquire("orders").await.unwrap());
        // Locks are per source.
        assert!(store.acquire("catalog").await.unwrap());

        store.release("orders").await.unwrap();
        assert!(store.acquire("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path()).with_lock_stale_after(Duration::minutes(10));

        let old = LockInfo {
            pid: 1,
            owner: "crashed".into(),
            acquired_at: Utc::now() - Duration::hours(2),
        };
        fs::write(store.lock_path("orders"), serde_json::to_string(&old).unwrap()).unwrap();
        assert!(store.acquire("orders").await.unwrap());
        assert!(store.refresh("orders").await.unwrap());
        assert!(!store.guard_path("orders").exists());
    }

    #[tokio::test]
    async fn test_fresh_unreadable_lock_is_not_stale() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path()).with_lock_stale_after(Duration::minutes(10));

        // Ages by mtime, which is now.
        fs::write(store.lock_path("customers"), "").unwrap();
        assert!(!store.acquire("customers").await.unwrap());

        let impatient = FileCheckpointStore::new(dir.path()).with_lock_stale_after(Duration::seconds(-1));
        assert!(impatient.acquire("customers").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_leaves_another_owners_lock() {
        let dir = TempDir::new().unwrap();
        let first = FileCheckpointStore::new(dir.path());
        // Every lock looks stale to `second`, so it takes over.
        let second = FileCheckpointStore::new(dir.path()).with_lock_stale_after(Duration::seconds(-1));

        assert!(first.acquire("orders").await.unwrap());
        assert!(second.acquire("orders").await.unwrap());

        assert!(!first.refresh("orders").await.unwrap());
        first.release("orders").await.unwrap();
        assert!(first.lock_path("orders").exists());
        assert!(second.refresh("orders").await.unwrap());

        second.release("orders").await.unwrap();
        assert!(!second.lock_path("orders").exists());
    }

    #[test]
    fn test_concurrent_acquire_has_one_winner() {
        use std::sync::Barrier;

        for _ in 0..50 {
            let dir = TempDir::new().unwrap();
            let barrier = Arc::new(Barrier::new(8));

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let store = FileCheckpointStore::new(dir.path());
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.try_lock("orders").unwrap()
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
        }
    }

    #[test]
    fn test_concurrent_stale_takeover_has_one_winner() {
        use std::sync::Barrier;

        for _ in 0..50 {
            let dir = TempDir::new().unwrap();
            let old = LockInfo {
                pid: 1,
                owner: "crashed".into(),
                acquired_at: Utc::now() - Duration::hours(2),
            };
            let store = FileCheckpointStore::new(dir.path());
            fs::write(store.lock_path("orders"), serde_json::to_string(&old).unwrap()).unwrap();
            let barrier = Arc::new(Barrier::new(8));

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let store = FileCheckpointStore::new(dir.path())
                        .with_lock_stale_after(Duration::minutes(10));
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.try_lock("orders").unwrap()
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
        }
    }

    #[tokio::test]
    async fn test_memory_store_refresh() {
        let store = MemoryCheckpointStore::new();
        assert!(!store.refresh("orders").await.unwrap());
        assert!(store.acquire("orders").await.unwrap());
        assert!(store.refresh("orders").await.unwrap());
        assert_eq!(store.refreshes(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_failing_saves() {
        let store = MemoryCheckpointStore::new().failing_saves();
        assert!(store.save("orders", &checkpoint()).await.is_err());
        assert!(store.get("orders").is_none());
    }
}

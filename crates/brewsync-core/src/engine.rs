//! One sync run for one source: lock, window, pages, records, checkpoint.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::analytics::{self, AnalyticsRecord, DailyRollup, InsightTracker};
use crate::checkpoint::CheckpointStore;
use crate::error::{Error, Result};
use crate::pages::Pages;
use crate::sink::{RecordSink, UpsertOutcome};
use crate::source::SyncSource;
use crate::types::{RunStats, SyncCheckpoint, SyncWindow};

/// Per-source run settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// How far back a cold start reaches.
    pub backfill_days: i64,
    /// Subtracted from the checkpoint position on a warm start.
    pub resume_lookback: Duration,
    /// Subtracted from the latest `updated_at` when advancing the checkpoint.
    pub checkpoint_overlap: Duration,
    /// Save every N pages for ascending sources. 0 disables periodic saves.
    pub checkpoint_every_pages: u64,
    pub max_pages: Option<u64>,
    /// Append derived analytics for newly stored transactions.
    pub analytics: bool,
    /// Ignore any stored checkpoint and backfill.
    pub full: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            backfill_days: 1825,
            resume_lookback: Duration::minutes(5),
            checkpoint_overlap: Duration::seconds(5),
            checkpoint_every_pages: 10,
            max_pages: None,
            analytics: true,
            full: false,
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub source: String,
    pub window: SyncWindow,
    pub stats: RunStats,
    pub checkpoint: SyncCheckpoint,
    /// False when the final checkpoint write failed.
    pub checkpoint_saved: bool,
}

/// Drives a [`SyncSource`] into a [`RecordSink`], tracking progress in a
/// [`CheckpointStore`].
pub struct SyncEngine<'a, S, K, C> {
    source: &'a S,
    sink: &'a K,
    checkpoints: &'a C,
    options: SyncOptions,
}

/// Progress carried across pages of one run.
struct RunState {
    stats: RunStats,
    latest: Option<DateTime<Utc>>,
    daily: DailyRollup,
    insights: InsightTracker,
}

impl<'a, S, K, C> SyncEngine<'a, S, K, C>
where
    S: SyncSource,
    K: RecordSink,
    C: CheckpointStore,
{
    pub fn new(source: &'a S, sink: &'a K, checkpoints: &'a C, options: SyncOptions) -> Self {
        Self {
            source,
            sink,
            checkpoints,
            options,
        }
    }

    /// Run one pass. The run lock is always released, whatever the outcome.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let name = self.source.name().to_string();

        if !self.checkpoints.acquire(&name).await? {
            warn!(source = %name, "Another run holds the lock");
            return Err(Error::AlreadyRunning(name));
        }

        let result = self.run_locked(&name, now).await;

        if let Err(e) = self.checkpoints.release(&name).await {
            warn!(source = %name, error = %e, "Failed to release run lock");
        }

        result
    }

    async fn run_locked(&self, name: &str, now: DateTime<Utc>) -> Result<RunSummary> {
        let previous = if self.options.full {
            None
        } else {
            self.checkpoints.load(name).await
        };

        let window = match &previous {
            Some(cp) => SyncWindow::resume(cp.next_start, self.options.resume_lookback, now),
            None => SyncWindow::backfill(now, self.options.backfill_days),
        };

        info!(
            source = name,
            mode = window.mode.as_str(),
            start = %window.start,
            end = %window.end,
            "Starting sync"
        );

        let mut pages = Pages::new(self.source, window).with_max_pages(self.options.max_pages);
        let mut state = RunState {
            stats: RunStats::default(),
            latest: None,
            daily: DailyRollup::new(),
            insights: InsightTracker::new(),
        };

        loop {
            let page = match pages.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    error!(
                        source = name,
                        pages = pages.pages(),
                        records = pages.records(),
                        error = %e,
                        "Sync aborted, checkpoint not advanced"
                    );
                    self.flush_daily(name, &state.daily, now).await;
                    return Err(e);
                }
            };

            state.stats.pages = pages.pages();
            state.stats.count = pages.records();

            for raw in &page.records {
                self.process(name, raw, &mut state, now).await;
            }

            match self.checkpoints.refresh(name).await {
                Ok(true) => {}
                Ok(false) => {
                    error!(source = name, pages = state.stats.pages, "Run lock was taken over, aborting");
                    self.flush_daily(name, &state.daily, now).await;
                    return Err(Error::LockLost(name.to_string()));
                }
                Err(e) => warn!(source = name, error = %e, "Failed to refresh run lock"),
            }

            let every = self.options.checkpoint_every_pages;
            if self.source.ascending() && every > 0 && state.stats.pages % every == 0 {
                let checkpoint = self.checkpoint(&window, previous.as_ref(), &state, now);
                debug!(source = name, pages = state.stats.pages, "Periodic checkpoint");
                self.persist(name, &checkpoint).await;
            }
        }

        self.flush_daily(name, &state.daily, now).await;

        let checkpoint = self.checkpoint(&window, previous.as_ref(), &state, now);
        let checkpoint_saved = self.persist(name, &checkpoint).await;

        info!(
            source = name,
            pages = state.stats.pages,
            records = state.stats.count,
            upserted = state.stats.upserted,
            skipped = state.stats.skipped,
            failed = state.stats.failed,
            next_start = %checkpoint.next_start,
            "Sync complete"
        );

        Ok(RunSummary {
            source: name.to_string(),
            window,
            stats: state.stats,
            checkpoint,
            checkpoint_saved,
        })
    }

    async fn process(
        &self,
        name: &str,
        raw: &serde_json::Value,
        state: &mut RunState,
        now: DateTime<Utc>,
    ) {
        let record = match self.source.transform(raw) {
            Ok(record) => record,
            Err(e) => {
                state.stats.skipped += 1;
                warn!(
                    source = name,
                    id = raw.get("id").and_then(|v| v.as_str()),
                    error = %e,
                    "Skipping record"
                );
                return;
            }
        };

        let record = self.source.enrich(record).await;

        if let Some(ts) = record.updated_at() {
            state.latest = Some(state.latest.map_or(ts, |latest| latest.max(ts)));
        }

        let outcome = match self.sink.upsert(&record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                state.stats.failed += 1;
                error!(
                    source = name,
                    id = record.source_id(),
                    error = %e,
                    "Failed to upsert record"
                );
                return;
            }
        };
        state.stats.upserted += 1;

        // Replays update rows in place and must not add revenue twice.
        if !self.options.analytics || outcome != UpsertOutcome::Inserted {
            return;
        }
        let Some(hourly) = analytics::derive(&record) else {
            return;
        };
        state.daily.add(&record);
        let insight = state.insights.observe(&hourly, now);

        self.append(name, &hourly).await;
        if let Some(insight) = insight {
            info!(
                source = name,
                id = record.source_id(),
                note = insight.note.as_deref(),
                "High-value transaction"
            );
            self.append(name, &insight).await;
        }
    }

    /// Rows inserted by this run are never inserted again, so their daily
    /// totals are written even when the run aborts.
    async fn flush_daily(&self, name: &str, daily: &DailyRollup, now: DateTime<Utc>) {
        if daily.is_empty() {
            return;
        }
        let run_id = format!("{}@{}", name, now.to_rfc3339());
        for record in daily.records(&run_id) {
            self.append(name, &record).await;
        }
    }

    async fn append(&self, name: &str, record: &AnalyticsRecord) {
        if let Err(e) = self.sink.append_analytics(record).await {
            warn!(
                source = name,
                period = record.period.as_str(),
                id = %record.source_id,
                error = %e,
                "Failed to append analytics"
            );
        }
    }

    /// The checkpoint never moves backwards from the one the run started with.
    fn checkpoint(
        &self,
        window: &SyncWindow,
        previous: Option<&SyncCheckpoint>,
        state: &RunState,
        now: DateTime<Utc>,
    ) -> SyncCheckpoint {
        let fallback = previous.map_or(window.start, |cp| cp.next_start);
        let next_start = match state.latest {
            Some(latest) => (latest - self.options.checkpoint_overlap).max(fallback),
            None => fallback,
        };

        SyncCheckpoint {
            next_start,
            last_run_at: Some(now),
            last_updated_at: state
                .latest
                .or_else(|| previous.and_then(|cp| cp.last_updated_at)),
            mode: window.mode,
            last_result: state.stats,
        }
    }

    /// Save errors are logged; the next run reprocesses the same window.
    async fn persist(&self, name: &str, checkpoint: &SyncCheckpoint) -> bool {
        match self.checkpoints.save(name, checkpoint).await {
            Ok(()) => true,
            Err(e) => {
                warn!(source = name, error = %e, "Failed to save checkpoint");
                false
            }
        }
    }
}

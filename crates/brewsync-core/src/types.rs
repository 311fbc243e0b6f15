use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Whether a run is a first full backfill or an incremental delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Backfill,
    Delta,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Backfill => "backfill",
            SyncMode::Delta => "delta",
        }
    }
}

/// The time range a single run asks the upstream API for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub mode: SyncMode,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Window starts never go before the Unix epoch.
fn earlier(at: DateTime<Utc>, by: Option<Duration>) -> DateTime<Utc> {
    by.and_then(|by| at.checked_sub_signed(by))
        .unwrap_or(DateTime::UNIX_EPOCH)
        .max(DateTime::UNIX_EPOCH)
}

impl SyncWindow {
    /// Cold start: look back `backfill_days` from `now`.
    pub fn backfill(now: DateTime<Utc>, backfill_days: i64) -> Self {
        Self {
            mode: SyncMode::Backfill,
            start: earlier(now, Duration::try_days(backfill_days)),
            end: now,
        }
    }

    /// Warm start: resume from a checkpoint position minus a lookback overlap.
    pub fn resume(next_start: DateTime<Utc>, lookback: Duration, now: DateTime<Utc>) -> Self {
        Self {
            mode: SyncMode::Delta,
            start: earlier(next_start, Some(lookback)),
            end: now,
        }
    }
}

/// Counters for one run, persisted with the checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Records received from upstream, across all pages.
    #[serde(default, alias = "total")]
    pub count: u64,
    /// Pages fetched.
    #[serde(default)]
    pub pages: u64,
    #[serde(default)]
    pub upserted: u64,
    /// Records dropped because they could not be transformed.
    #[serde(default)]
    pub skipped: u64,
    /// Records that transformed but failed to write.
    #[serde(default)]
    pub failed: u64,
}

/// Persisted sync position for one source.
///
/// Older checkpoint files used `last_sync_at` or `lastSync` for the resume
/// position; both are still accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Where the next run starts, before its lookback is applied.
    #[serde(alias = "last_sync_at", alias = "lastSync")]
    pub next_start: DateTime<Utc>,
    /// When the run that wrote this checkpoint started.
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Latest `updated_at` seen in that run.
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub last_result: RunStats,
}

impl SyncCheckpoint {
    pub fn new(next_start: DateTime<Utc>) -> Self {
        Self {
            next_start,
            last_run_at: None,
            last_updated_at: None,
            mode: SyncMode::Delta,
            last_result: RunStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backfill_window() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let window = SyncWindow::backfill(now, 5);
        assert_eq!(window.mode, SyncMode::Backfill);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap());
        assert_eq!(window.end, now);
    }

    #[test]
    fn test_resume_window_applies_lookback() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2025, 3, 10, 11, 0, 0).unwrap();
        let window = SyncWindow::resume(next, Duration::minutes(5), now);
        assert_eq!(window.mode, SyncMode::Delta);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 3, 10, 10, 55, 0).unwrap());
    }

    #[test]
    fn test_huge_lookbacks_clamp_to_epoch() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();

        assert_eq!(SyncWindow::backfill(now, 1_000_000_000).start, DateTime::UNIX_EPOCH);
        assert_eq!(SyncWindow::backfill(now, i64::MAX).start, DateTime::UNIX_EPOCH);
        assert_eq!(
            SyncWindow::resume(now, Duration::days(365 * 100), now).start,
            DateTime::UNIX_EPOCH
        );
    }

    #[test]
    fn test_checkpoint_reads_legacy_keys() {
        let json = r#"{"last_sync_at":"2025-01-02T03:04:05Z","last_result":{"total":12,"pages":2}}"#;
        let cp: SyncCheckpoint = serde_json::from_str(json).unwrap();
        assert_eq!(cp.next_start, Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(cp.last_result.count, 12);
        assert_eq!(cp.last_result.pages, 2);
        assert_eq!(cp.mode, SyncMode::Backfill);

        let json = r#"{"lastSync":"2025-01-02T03:04:05.000Z","processedCount":3}"#;
        let cp: SyncCheckpoint = serde_json::from_str(json).unwrap();
        assert_eq!(cp.next_start, Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap());
    }
}

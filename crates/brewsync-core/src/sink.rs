use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::analytics::AnalyticsRecord;
use crate::error::{Error, Result};
use crate::record::{SyncRecord, TransactionItem};

/// Outcome of one upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Persistent destination for synced records.
pub trait RecordSink: Send + Sync {
    /// Insert or update keyed by the record's upstream id. Must be
    /// idempotent; the local id and creation time of an existing row are
    /// kept.
    fn upsert(&self, record: &SyncRecord) -> impl Future<Output = Result<UpsertOutcome>> + Send;

    /// Append a derived analytics record.
    fn append_analytics(
        &self,
        record: &AnalyticsRecord,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// In-memory sink with the same conflict rules as the Postgres sink.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, SyncRecord>,
    analytics: Vec<AnalyticsRecord>,
    upsert_calls: usize,
    fail_ids: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make upserts of the given upstream id fail.
    pub fn fail_on(&self, source_id: impl Into<String>) {
        self.state.lock().unwrap().fail_ids.push(source_id.into());
    }

    pub fn get(&self, kind: &str, source_id: &str) -> Option<SyncRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&key(kind, source_id))
            .cloned()
    }

    /// Number of stored records with this upstream id, across all kinds.
    pub fn count_source_id(&self, source_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.source_id() == source_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn upsert_calls(&self) -> usize {
        self.state.lock().unwrap().upsert_calls
    }

    pub fn analytics(&self) -> Vec<AnalyticsRecord> {
        self.state.lock().unwrap().analytics.clone()
    }

    fn apply(&self, record: &SyncRecord) -> Result<UpsertOutcome> {
        let mut state = self.state.lock().unwrap();
        state.upsert_calls += 1;

        if state.fail_ids.iter().any(|id| id == record.source_id()) {
            return Err(Error::Sink(format!(
                "simulated write failure for {}",
                record.source_id()
            )));
        }

        let key = key(record.kind(), record.source_id());
        let merged = match state.records.get(&key) {
            Some(existing) => merge(existing, record),
            None => {
                state.records.insert(key, record.clone());
                return Ok(UpsertOutcome::Inserted);
            }
        };
        state.records.insert(key, merged);
        Ok(UpsertOutcome::Updated)
    }
}

fn key(kind: &str, source_id: &str) -> String {
    format!("{}:{}", kind, source_id)
}

/// Apply the conflict rules: incoming business fields win, local ids and
/// creation timestamps stay.
fn merge(existing: &SyncRecord, incoming: &SyncRecord) -> SyncRecord {
    match (existing, incoming) {
        (SyncRecord::Transaction(old), SyncRecord::Transaction(new)) => {
            let mut merged = new.clone();
            merged.id = old.id;
            merged.created_at = old.created_at.or(new.created_at);
            merged.items = merge_items(&old.items, &new.items);
            SyncRecord::Transaction(merged)
        }
        (SyncRecord::Order(old), SyncRecord::Order(new)) => {
            let mut merged = new.clone();
            merged.id = old.id;
            merged.created_at = old.created_at.or(new.created_at);
            SyncRecord::Order(merged)
        }
        (SyncRecord::Customer(old), SyncRecord::Customer(new)) => {
            let mut merged = new.clone();
            merged.id = old.id;
            merged.created_at = old.created_at.or(new.created_at);
            SyncRecord::Customer(merged)
        }
        _ => incoming.clone(),
    }
}

/// Items are keyed by line uid within their transaction.
fn merge_items(old: &[TransactionItem], new: &[TransactionItem]) -> Vec<TransactionItem> {
    let mut merged: Vec<TransactionItem> = old.to_vec();
    for item in new {
        match merged.iter_mut().find(|i| i.line_uid == item.line_uid) {
            Some(existing) => {
                let id = existing.id;
                *existing = item.clone();
                existing.id = id;
            }
            None => merged.push(item.clone()),
        }
    }
    merged
}

impl RecordSink for MemorySink {
    fn upsert(&self, record: &SyncRecord) -> impl Future<Output = Result<UpsertOutcome>> + Send {
        let result = self.apply(record);
        async move { result }
    }

    fn append_analytics(
        &self,
        record: &AnalyticsRecord,
    ) -> impl Future<Output = Result<()>> + Send {
        self.state.lock().unwrap().analytics.push(record.clone());
        async { Ok(()) }
    }
}

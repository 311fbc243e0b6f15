//! Scripted source used by the engine and page tests.

use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result, TransformError, TransformResult};
use crate::record::{SyncRecord, Transaction};
use crate::source::{RawPage, SyncSource};
use crate::types::SyncWindow;

enum Script {
    Pages(Vec<Vec<serde_json::Value>>),
    Endless,
    Stuck(String),
}

#[derive(Default)]
struct CallLog {
    calls: usize,
    cursors: Vec<Option<String>>,
    windows: Vec<SyncWindow>,
}

pub(crate) struct ScriptedSource {
    script: Script,
    ascending: bool,
    fail_on_call: Option<usize>,
    log: Mutex<CallLog>,
}

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// A raw record shaped the way [`ScriptedSource::transform`] expects.
pub(crate) fn raw_record(id: &str, updated_at: DateTime<Utc>) -> serde_json::Value {
    json!({
        "id": id,
        "amount": 350,
        "updated_at": updated_at.to_rfc3339(),
    })
}

impl ScriptedSource {
    fn new(script: Script) -> Self {
        Self {
            script,
            ascending: false,
            fail_on_call: None,
            log: Mutex::new(CallLog::default()),
        }
    }

    pub fn from_pages(pages: Vec<Vec<serde_json::Value>>) -> Self {
        Self::new(Script::Pages(pages))
    }

    /// Pages of generated records; record `n` overall is stamped
    /// `base_time() + n seconds`.
    pub fn with_page_sizes(sizes: &[usize]) -> Self {
        let mut n = 0i64;
        let pages = sizes
            .iter()
            .enumerate()
            .map(|(page, size)| {
                (0..*size)
                    .map(|i| {
                        let record = raw_record(
                            &format!("rec-{}-{}", page, i),
                            base_time() + Duration::seconds(n),
                        );
                        n += 1;
                        record
                    })
                    .collect()
            })
            .collect();
        Self::from_pages(pages)
    }

    pub fn endless() -> Self {
        Self::new(Script::Endless)
    }

    pub fn stuck(cursor: &str) -> Self {
        Self::new(Script::Stuck(cursor.to_string()))
    }

    pub fn ascending(mut self) -> Self {
        self.ascending = true;
        self
    }

    /// Make the `call`-th fetch (1-based) fail.
    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().calls
    }

    pub fn cursors_seen(&self) -> Vec<Option<String>> {
        self.log.lock().unwrap().cursors.clone()
    }

    pub fn windows_seen(&self) -> Vec<SyncWindow> {
        self.log.lock().unwrap().windows.clone()
    }

    fn page_index(cursor: Option<&str>) -> usize {
        cursor
            .and_then(|c| c.strip_prefix("page-"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    fn respond(&self, window: &SyncWindow, cursor: Option<&str>) -> Result<RawPage> {
        let mut log = self.log.lock().unwrap();
        log.calls += 1;
        log.cursors.push(cursor.map(str::to_string));
        log.windows.push(*window);

        if self.fail_on_call == Some(log.calls) {
            return Err(Error::fetch("scripted", "HTTP 503: upstream unavailable"));
        }

        let index = Self::page_index(cursor);
        match &self.script {
            Script::Pages(pages) => {
                let records = pages.get(index).cloned().unwrap_or_default();
                let cursor = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));
                Ok(RawPage::new(records, cursor))
            }
            Script::Endless => Ok(RawPage::new(
                vec![raw_record(&format!("endless-{}", index), base_time())],
                Some(format!("page-{}", index + 1)),
            )),
            Script::Stuck(c) => Ok(RawPage::new(
                vec![raw_record("stuck", base_time())],
                Some(c.clone()),
            )),
        }
    }
}

impl SyncSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn ascending(&self) -> bool {
        self.ascending
    }

    fn fetch_page(
        &self,
        window: &SyncWindow,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<RawPage>> + Send {
        let result = self.respond(window, cursor);
        async move { result }
    }

    fn transform(&self, raw: &serde_json::Value) -> TransformResult<SyncRecord> {
        let obj = raw.as_object().ok_or(TransformError::NotAnObject)?;
        let source_id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(TransformError::MissingId)?;
        let updated_at = obj
            .get("updated_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(SyncRecord::Transaction(Transaction {
            id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            customer_id: None,
            location_id: None,
            total_amount: obj.get("amount").and_then(|v| v.as_i64()).unwrap_or(0),
            tax_amount: 0,
            discount_amount: 0,
            payment_method: "CARD".to_string(),
            status: Some("COMPLETED".to_string()),
            created_at: updated_at,
            updated_at,
            metadata: json!({}),
            items: vec![],
        }))
    }
}

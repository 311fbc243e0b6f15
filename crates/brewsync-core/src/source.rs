use std::future::Future;

use crate::error::{Result, TransformResult};
use crate::record::SyncRecord;
use crate::types::SyncWindow;

/// One page of raw upstream records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub records: Vec<serde_json::Value>,
    /// Continuation cursor. `None` (or empty) means this was the last page.
    pub cursor: Option<String>,
}

impl RawPage {
    pub fn new(records: Vec<serde_json::Value>, cursor: Option<String>) -> Self {
        Self {
            records,
            cursor: cursor.filter(|c| !c.is_empty()),
        }
    }

    pub fn has_more(&self) -> bool {
        self.cursor.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// An upstream paginated endpoint plus the transform for its records.
pub trait SyncSource: Send + Sync {
    /// Stable name, used as the checkpoint key.
    fn name(&self) -> &str;

    /// Whether pages arrive in ascending `updated_at` order. Only ascending
    /// sources may advance the checkpoint before the run finishes.
    fn ascending(&self) -> bool {
        false
    }

    /// Fetch one page of the window, continuing from `cursor`.
    fn fetch_page(
        &self,
        window: &SyncWindow,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<RawPage>> + Send;

    /// Map one raw record to a sink record.
    fn transform(&self, raw: &serde_json::Value) -> TransformResult<SyncRecord>;

    /// Attach data that needs further upstream calls. Failures must be
    /// absorbed here; the record is written either way.
    fn enrich(&self, record: SyncRecord) -> impl Future<Output = SyncRecord> + Send {
        async move { record }
    }
}

pub mod analytics;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod pages;
pub mod record;
pub mod sink;
pub mod source;
pub mod types;

#[cfg(test)]
mod testing;

pub use analytics::{AnalyticsPeriod, AnalyticsRecord, DailyRollup, InsightTracker, ProductSale};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use engine::{RunSummary, SyncEngine, SyncOptions};
pub use error::{Error, Result, TransformError, TransformResult};
pub use pages::Pages;
pub use record::{
    CatalogRecord, CustomerRecord, OrderRecord, SyncRecord, Transaction, TransactionItem,
};
pub use sink::{MemorySink, RecordSink, UpsertOutcome};
pub use source::{RawPage, SyncSource};
pub use types::{RunStats, SyncCheckpoint, SyncMode, SyncWindow};

//! Normalized records written to the sink.
//!
//! Money is carried as integer minor units (cents), exactly as the upstream
//! API reports it. Sinks decide how to present it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record ready to be upserted, keyed by its upstream id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncRecord {
    Transaction(Transaction),
    Order(OrderRecord),
    CatalogObject(CatalogRecord),
    Customer(CustomerRecord),
}

impl SyncRecord {
    /// The upstream id, used as the idempotency key.
    pub fn source_id(&self) -> &str {
        match self {
            SyncRecord::Transaction(t) => &t.source_id,
            SyncRecord::Order(o) => &o.source_id,
            SyncRecord::CatalogObject(c) => &c.source_id,
            SyncRecord::Customer(c) => &c.source_id,
        }
    }

    /// Upstream modification time, used to advance the checkpoint.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SyncRecord::Transaction(t) => t.updated_at,
            SyncRecord::Order(o) => o.updated_at,
            SyncRecord::CatalogObject(c) => c.updated_at,
            SyncRecord::Customer(c) => c.updated_at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncRecord::Transaction(_) => "transaction",
            SyncRecord::Order(_) => "order",
            SyncRecord::CatalogObject(_) => "catalog_object",
            SyncRecord::Customer(_) => "customer",
        }
    }
}

/// A completed (or in-flight) payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Local id. Only used on first insert; an existing row keeps its own.
    pub id: Uuid,
    pub source_id: String,
    pub customer_id: Option<String>,
    pub location_id: Option<String>,
    pub total_amount: i64,
    pub tax_amount: i64,
    pub discount_amount: i64,
    pub payment_method: String,
    pub status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub items: Vec<TransactionItem>,
}

impl Transaction {
    /// The upstream order this payment settled, if any.
    pub fn order_id(&self) -> Option<&str> {
        self.metadata.get("order_id").and_then(|v| v.as_str())
    }
}

/// One line of a transaction, keyed by `(transaction, line_uid)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionItem {
    pub id: Uuid,
    /// Upstream line-item uid, or the line position when upstream has none.
    pub line_uid: String,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub category: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
    pub modifiers: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub source_id: String,
    pub customer_id: Option<String>,
    pub location_id: Option<String>,
    pub state: Option<String>,
    pub total_amount: i64,
    pub tax_amount: i64,
    pub discount_amount: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub line_items: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub source_id: String,
    pub object_type: String,
    pub version: i64,
    pub is_deleted: bool,
    pub name: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: Uuid,
    pub source_id: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

//! Derived analytics appended alongside stored transactions.
//!
//! Every document is derived from transactions stored for the first time, so
//! replays never count revenue twice. Hourly documents are per transaction;
//! daily documents are the per-run totals of each day the run touched, and a
//! day's revenue is the sum of its daily documents.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{SyncRecord, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsPeriod {
    Hourly,
    Daily,
    /// A single transaction flagged as unusual, not an aggregate.
    Insight,
}

impl AnalyticsPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsPeriod::Hourly => "hourly",
            AnalyticsPeriod::Daily => "daily",
            AnalyticsPeriod::Insight => "insight",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSale {
    pub product_name: String,
    pub quantity: i32,
    /// Cents.
    pub revenue: i64,
}

/// One analytics document. Amounts are in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub period: AnalyticsPeriod,
    pub bucket: DateTime<Utc>,
    /// Upstream id of the transaction this was derived from.
    pub source_id: String,
    pub total_revenue: i64,
    pub transaction_count: u32,
    pub average_transaction_value: i64,
    pub unique_customers: u32,
    pub top_products: Vec<ProductSale>,
    /// Human-readable description, set on insights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Derive the hourly analytics record for a stored record.
///
/// Only transactions with a creation time produce one.
pub fn derive(record: &SyncRecord) -> Option<AnalyticsRecord> {
    match record {
        SyncRecord::Transaction(t) => hourly(t),
        _ => None,
    }
}

fn hourly(transaction: &Transaction) -> Option<AnalyticsRecord> {
    let created_at = transaction.created_at?;
    let bucket = created_at
        .duration_trunc(TimeDelta::hours(1))
        .unwrap_or(created_at);

    let top_products = transaction
        .items
        .iter()
        .map(|item| ProductSale {
            product_name: item
                .product_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            quantity: item.quantity,
            revenue: item.total_price,
        })
        .collect();

    Some(AnalyticsRecord {
        period: AnalyticsPeriod::Hourly,
        bucket,
        source_id: transaction.source_id.clone(),
        total_revenue: transaction.total_amount,
        transaction_count: 1,
        average_transaction_value: transaction.total_amount,
        unique_customers: u32::from(transaction.customer_id.is_some()),
        top_products,
        note: None,
    })
}

const TOP_PRODUCTS: usize = 5;

#[derive(Debug, Default)]
struct DayTotals {
    revenue: i64,
    count: u32,
    customers: HashSet<String>,
    products: HashMap<String, ProductSale>,
}

/// Per-day totals over the transactions a run stored.
#[derive(Debug, Default)]
pub struct DailyRollup {
    days: BTreeMap<DateTime<Utc>, DayTotals>,
}

impl DailyRollup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: &SyncRecord) {
        let SyncRecord::Transaction(t) = record else {
            return;
        };
        let Some(created_at) = t.created_at else {
            return;
        };
        let day = created_at
            .duration_trunc(TimeDelta::days(1))
            .unwrap_or(created_at);

        let totals = self.days.entry(day).or_default();
        totals.revenue += t.total_amount;
        totals.count += 1;
        if let Some(customer) = &t.customer_id {
            totals.customers.insert(customer.clone());
        }
        for item in &t.items {
            let name = item
                .product_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let sale = totals
                .products
                .entry(name.clone())
                .or_insert_with(|| ProductSale {
                    product_name: name,
                    quantity: 0,
                    revenue: 0,
                });
            sale.quantity += item.quantity;
            sale.revenue += item.total_price;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// One daily document per day, oldest first. `run_id` keeps documents
    /// from different runs distinct.
    pub fn records(&self, run_id: &str) -> Vec<AnalyticsRecord> {
        self.days
            .iter()
            .map(|(day, totals)| {
                let mut top_products: Vec<ProductSale> = totals.products.values().cloned().collect();
                top_products.sort_by(|a, b| {
                    b.revenue
                        .cmp(&a.revenue)
                        .then_with(|| a.product_name.cmp(&b.product_name))
                });
                top_products.truncate(TOP_PRODUCTS);

                AnalyticsRecord {
                    period: AnalyticsPeriod::Daily,
                    bucket: *day,
                    source_id: format!("{}/{}", run_id, day.format("%Y-%m-%d")),
                    total_revenue: totals.revenue,
                    transaction_count: totals.count,
                    average_transaction_value: totals.revenue / i64::from(totals.count.max(1)),
                    unique_customers: totals.customers.len() as u32,
                    top_products,
                    note: None,
                }
            })
            .collect()
    }
}

const INSIGHT_LOOKBACK_DAYS: i64 = 7;
const INSIGHT_SAMPLE: usize = 100;
const INSIGHT_MIN_SAMPLE: usize = 10;
const HIGH_VALUE_FACTOR: i64 = 2;

/// Flags transactions worth more than twice the recent average.
///
/// The baseline is the last 100 hourly documents of the past week, and at
/// least 10 are needed before anything is flagged.
#[derive(Debug, Default)]
pub struct InsightTracker {
    recent: VecDeque<i64>,
}

impl InsightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an hourly document and return an insight if its transaction
    /// stands out.
    pub fn observe(
        &mut self,
        hourly: &AnalyticsRecord,
        now: DateTime<Utc>,
    ) -> Option<AnalyticsRecord> {
        if hourly.bucket >= now - TimeDelta::days(INSIGHT_LOOKBACK_DAYS) {
            self.recent.push_back(hourly.total_revenue);
            if self.recent.len() > INSIGHT_SAMPLE {
                self.recent.pop_front();
            }
        }

        if self.recent.len() < INSIGHT_MIN_SAMPLE {
            return None;
        }
        let sum: i64 = self.recent.iter().sum();
        let samples = self.recent.len() as i64;
        if hourly.total_revenue * samples <= sum * HIGH_VALUE_FACTOR {
            return None;
        }

        let average = sum / samples;
        Some(AnalyticsRecord {
            period: AnalyticsPeriod::Insight,
            bucket: hourly.bucket,
            source_id: hourly.source_id.clone(),
            total_revenue: hourly.total_revenue,
            transaction_count: 1,
            average_transaction_value: average,
            unique_customers: hourly.unique_customers,
            top_products: hourly.top_products.clone(),
            note: Some(format!(
                "High-value transaction: {} cents against a recent average of {} cents",
                hourly.total_revenue, average
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CatalogRecord, TransactionItem};
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    fn transaction(
        source_id: &str,
        total: i64,
        created: DateTime<Utc>,
        customer: Option<&str>,
        product: Option<&str>,
    ) -> SyncRecord {
        SyncRecord::Transaction(Transaction {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            customer_id: customer.map(Into::into),
            location_id: None,
            total_amount: total,
            tax_amount: 100,
            discount_amount: 0,
            payment_method: "CARD".into(),
            status: Some("COMPLETED".into()),
            created_at: Some(created),
            updated_at: Some(created),
            metadata: json!({}),
            items: vec![TransactionItem {
                id: Uuid::new_v4(),
                line_uid: "a".into(),
                product_id: None,
                product_name: product.map(Into::into),
                category: "ITEM".into(),
                quantity: 2,
                unit_price: total / 2,
                total_price: total,
                modifiers: json!([]),
            }],
        })
    }

    #[test]
    fn test_hourly_bucket_and_products() {
        let created = Utc.with_ymd_and_hms(2025, 4, 2, 8, 47, 13).unwrap();
        let record = transaction("pay_7", 1250, created, Some("CUST_1"), None);

        let analytics = derive(&record).unwrap();
        assert_eq!(analytics.bucket, Utc.with_ymd_and_hms(2025, 4, 2, 8, 0, 0).unwrap());
        assert_eq!(analytics.total_revenue, 1250);
        assert_eq!(analytics.unique_customers, 1);
        assert_eq!(analytics.top_products[0].product_name, "unknown");
        assert_eq!(analytics.top_products[0].quantity, 2);
        assert!(analytics.note.is_none());
    }

    #[test]
    fn test_daily_rollup() {
        let day = Utc.with_ymd_and_hms(2025, 4, 2, 0, 0, 0).unwrap();
        let mut rollup = DailyRollup::new();
        rollup.add(&transaction("p1", 500, day + TimeDelta::hours(8), Some("C1"), Some("Latte")));
        rollup.add(&transaction("p2", 300, day + TimeDelta::hours(9), Some("C1"), Some("Cookie")));
        rollup.add(&transaction("p3", 400, day + TimeDelta::hours(23), None, Some("Latte")));
        rollup.add(&transaction("p4", 900, day + TimeDelta::hours(25), Some("C2"), None));

        let records = rollup.records("orders@run");
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.period, AnalyticsPeriod::Daily);
        assert_eq!(first.bucket, day);
        assert_eq!(first.source_id, "orders@run/2025-04-02");
        assert_eq!(first.total_revenue, 1200);
        assert_eq!(first.transaction_count, 3);
        assert_eq!(first.average_transaction_value, 400);
        assert_eq!(first.unique_customers, 1);
        assert_eq!(first.top_products[0].product_name, "Latte");
        assert_eq!(first.top_products[0].revenue, 900);
        assert_eq!(first.top_products[0].quantity, 4);

        assert_eq!(records[1].bucket, day + TimeDelta::days(1));
        assert_eq!(records[1].total_revenue, 900);
    }

    #[test]
    fn test_high_value_insight_needs_a_baseline() {
        let now = Utc.with_ymd_and_hms(2025, 4, 10, 12, 0, 0).unwrap();
        let mut tracker = InsightTracker::new();

        let hourly = |id: &str, total: i64| {
            derive(&transaction(id, total, now - TimeDelta::hours(1), None, None)).unwrap()
        };

        // Too few samples to judge.
        assert!(tracker.observe(&hourly("big-early", 10_000), now).is_none());

        for i in 0..9 {
            assert!(tracker.observe(&hourly(&format!("p{}", i), 500), now).is_none());
        }
        // Average is now (10_000 + 9 * 500) / 10 = 1450.
        assert!(tracker.observe(&hourly("normal", 900), now).is_none());

        let insight = tracker.observe(&hourly("big", 5_000), now).unwrap();
        assert_eq!(insight.period, AnalyticsPeriod::Insight);
        assert_eq!(insight.source_id, "big");
        assert_eq!(insight.total_revenue, 5_000);
        assert!(insight.note.unwrap().contains("5000 cents"));
    }

    #[test]
    fn test_old_transactions_are_not_baseline() {
        let now = Utc.with_ymd_and_hms(2025, 4, 10, 12, 0, 0).unwrap();
        let mut tracker = InsightTracker::new();
        for i in 0..20 {
            let old = transaction(&format!("p{}", i), 100, now - TimeDelta::days(30), None, None);
            assert!(tracker.observe(&derive(&old).unwrap(), now).is_none());
        }
    }

    #[test]
    fn test_non_transactions_derive_nothing() {
        let record = SyncRecord::CatalogObject(CatalogRecord {
            source_id: "ITEM_1".into(),
            object_type: "ITEM".into(),
            version: 1,
            is_deleted: false,
            name: Some("Latte".into()),
            updated_at: None,
            data: json!({}),
        });
        assert!(derive(&record).is_none());
    }
}

//! Pure mappings from Square JSON to sink records.
//!
//! Optional fields default: money to 0, ids and timestamps to `None`,
//! quantity to 1. A record is only rejected when it has no id or is not an
//! object.

use brewsync_core::{
    CatalogRecord, CustomerRecord, OrderRecord, SyncRecord, Transaction, TransactionItem,
    TransformError, TransformResult,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::models::{cents, CatalogObject, Customer, Order, OrderLineItem, Payment};

/// Model fields decode leniently, so any object yields a value.
fn parse<T: DeserializeOwned + Default>(raw: &Value) -> TransformResult<T> {
    if !raw.is_object() {
        return Err(TransformError::NotAnObject);
    }
    Ok(serde_json::from_value(raw.clone()).unwrap_or_default())
}

fn require_id(id: Option<String>) -> TransformResult<String> {
    id.filter(|id| !id.trim().is_empty())
        .ok_or(TransformError::MissingId)
}

/// RFC 3339 or nothing. A malformed value is logged and stored as null.
fn timestamp(field: &str, value: &Option<String>) -> Option<DateTime<Utc>> {
    let s = value.as_deref().filter(|s| !s.is_empty())?;
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            warn!(field, value = s, error = %e, "Ignoring unparseable timestamp");
            None
        }
    }
}

/// Square quantities are decimal strings. Anything unparseable or
/// non-positive counts as one.
fn quantity(raw: Option<&str>) -> i32 {
    raw.and_then(|q| {
        let q = q.trim();
        q.parse::<i32>()
            .ok()
            .or_else(|| q.parse::<f64>().ok().map(|f| f.trunc() as i32))
    })
    .filter(|q| *q > 0)
    .unwrap_or(1)
}

/// A payment becomes a transaction without items; items come from the
/// payment's order during enrichment.
pub fn payment_to_record(raw: &Value) -> TransformResult<SyncRecord> {
    let payment: Payment = parse(raw)?;
    let source_id = require_id(payment.id)?;

    let payment_method = payment
        .payment_method
        .or(payment.source_type)
        .unwrap_or_else(|| "unknown".to_string());

    Ok(SyncRecord::Transaction(Transaction {
        id: Uuid::new_v4(),
        source_id,
        customer_id: payment.customer_id,
        location_id: payment.location_id,
        total_amount: cents(&payment.total_money),
        tax_amount: cents(&payment.tax_money),
        discount_amount: cents(&payment.discount_money),
        payment_method,
        status: payment.status,
        created_at: timestamp("created_at", &payment.created_at),
        updated_at: timestamp("updated_at", &payment.updated_at),
        metadata: json!({
            "receipt_url": payment.receipt_url,
            "order_id": payment.order_id,
            "reference_id": payment.reference_id,
        }),
        items: vec![],
    }))
}

/// Transaction items for an order's line items. Lines without a uid are
/// keyed by position.
pub fn line_items(order: &Order) -> Vec<TransactionItem> {
    order
        .line_items
        .iter()
        .enumerate()
        .map(|(index, item)| line_item(index, item))
        .collect()
}

fn line_item(index: usize, item: &OrderLineItem) -> TransactionItem {
    TransactionItem {
        id: Uuid::new_v4(),
        line_uid: item
            .uid
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| index.to_string()),
        product_id: item.catalog_object_id.clone(),
        product_name: item.name.clone(),
        category: item
            .item_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        quantity: quantity(item.quantity.as_deref()),
        unit_price: cents(&item.base_price_money),
        total_price: cents(&item.total_money),
        modifiers: item.modifiers.clone().unwrap_or_else(|| json!([])),
    }
}

pub fn order_to_record(raw: &Value) -> TransformResult<SyncRecord> {
    let order: Order = parse(raw)?;

    let summary: Vec<Value> = order
        .line_items
        .iter()
        .map(|li| {
            json!({
                "uid": li.uid,
                "name": li.name,
                "quantity": quantity(li.quantity.as_deref()),
                "variation": li.variation_name,
                "price": li.base_price_money.as_ref().and_then(|m| m.amount)
                    .or_else(|| li.total_money.as_ref().and_then(|m| m.amount)),
                "modifiers": li.modifiers.clone().unwrap_or_else(|| json!([])),
            })
        })
        .collect();

    Ok(SyncRecord::Order(OrderRecord {
        id: Uuid::new_v4(),
        source_id: require_id(order.id)?,
        customer_id: order.customer_id,
        location_id: order.location_id,
        state: order.state,
        total_amount: cents(&order.total_money),
        tax_amount: cents(&order.total_tax_money),
        discount_amount: cents(&order.total_discount_money),
        created_at: timestamp("created_at", &order.created_at),
        updated_at: timestamp("updated_at", &order.updated_at),
        closed_at: timestamp("closed_at", &order.closed_at),
        line_items: Value::Array(summary),
    }))
}

/// The display name lives under the type-specific data key, e.g.
/// `item_data.name` or `category_data.name`.
fn catalog_name(raw: &Value) -> Option<String> {
    raw.as_object()?
        .iter()
        .filter(|(key, _)| key.ends_with("_data"))
        .find_map(|(_, data)| data.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
}

pub fn catalog_to_record(raw: &Value) -> TransformResult<SyncRecord> {
    let object: CatalogObject = parse(raw)?;

    Ok(SyncRecord::CatalogObject(CatalogRecord {
        source_id: require_id(object.id)?,
        object_type: object.object_type.unwrap_or_else(|| "UNKNOWN".to_string()),
        version: object.version.unwrap_or(0),
        is_deleted: object.is_deleted.unwrap_or(false),
        name: catalog_name(raw),
        updated_at: timestamp("updated_at", &object.updated_at),
        data: raw.clone(),
    }))
}

pub fn customer_to_record(raw: &Value) -> TransformResult<SyncRecord> {
    let customer: Customer = parse(raw)?;

    Ok(SyncRecord::Customer(CustomerRecord {
        id: Uuid::new_v4(),
        source_id: require_id(customer.id)?,
        given_name: customer.given_name,
        family_name: customer.family_name,
        email: customer.email_address,
        phone: customer.phone_number,
        version: customer.version.unwrap_or(0),
        created_at: timestamp("created_at", &customer.created_at),
        updated_at: timestamp("updated_at", &customer.updated_at),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn payment_fixture() -> Value {
        json!({
            "id": "pay_R3x",
            "created_at": "2025-03-01T14:02:11.123Z",
            "updated_at": "2025-03-01T14:02:15Z",
            "total_money": { "amount": 1250, "currency": "USD" },
            "tax_money": { "amount": 100, "currency": "USD" },
            "status": "COMPLETED",
            "source_type": "CARD",
            "location_id": "L1",
            "order_id": "ord_9",
            "receipt_url": "https://squareup.com/receipt/preview/pay_R3x",
            "customer_id": "CUST_1"
        })
    }

    #[test]
    fn test_payment_mapping() {
        let SyncRecord::Transaction(t) = payment_to_record(&payment_fixture()).unwrap() else {
            panic!("expected a transaction");
        };

        assert_eq!(t.source_id, "pay_R3x");
        assert_eq!(t.total_amount, 1250);
        assert_eq!(t.tax_amount, 100);
        assert_eq!(t.discount_amount, 0);
        assert_eq!(t.payment_method, "CARD");
        assert_eq!(t.order_id(), Some("ord_9"));
        assert_eq!(
            t.updated_at,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 14, 2, 15).unwrap())
        );
        assert!(t.items.is_empty());
    }

    #[test]
    fn test_payment_defaults() {
        let SyncRecord::Transaction(t) = payment_to_record(&json!({ "id": "pay_1" })).unwrap()
        else {
            panic!("expected a transaction");
        };
        assert_eq!(t.total_amount, 0);
        assert_eq!(t.payment_method, "unknown");
        assert!(t.customer_id.is_none());
        assert!(t.created_at.is_none());
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            payment_to_record(&json!({ "total_money": { "amount": 5 } })).unwrap_err(),
            TransformError::MissingId
        );
        assert_eq!(
            customer_to_record(&json!({ "id": "" })).unwrap_err(),
            TransformError::MissingId
        );
        assert_eq!(
            order_to_record(&json!("ord_1")).unwrap_err(),
            TransformError::NotAnObject
        );
    }

    #[test]
    fn test_malformed_optional_fields_keep_the_record() {
        let SyncRecord::Transaction(t) = payment_to_record(&json!({
            "id": "pay_1",
            "created_at": "2025-03-01 14:02:11",
            "updated_at": "2025-03-01T14:02:15Z",
            "total_money": { "amount": 700 },
            "status": 3
        }))
        .unwrap() else {
            panic!("expected a transaction");
        };
        assert_eq!(t.source_id, "pay_1");
        assert!(t.created_at.is_none());
        assert!(t.updated_at.is_some());
        assert_eq!(t.total_amount, 700);
        assert!(t.status.is_none());

        let SyncRecord::CatalogObject(c) =
            catalog_to_record(&json!({ "id": "I1", "type": "ITEM", "is_deleted": null })).unwrap()
        else {
            panic!("expected a catalog object");
        };
        assert_eq!(c.source_id, "I1");
        assert!(!c.is_deleted);

        let SyncRecord::Customer(c) = customer_to_record(&json!({
            "id": "CUST_1",
            "version": "v2",
            "updated_at": "yesterday"
        }))
        .unwrap() else {
            panic!("expected a customer");
        };
        assert_eq!(c.version, 0);
        assert!(c.updated_at.is_none());
    }

    #[test]
    fn test_line_items() {
        let order = json!({
            "id": "ord_9",
            "line_items": [
                {
                    "uid": "li-a",
                    "name": "Latte",
                    "quantity": "2",
                    "catalog_object_id": "VAR_LATTE",
                    "item_type": "ITEM",
                    "base_price_money": { "amount": 450 },
                    "total_money": { "amount": 900 },
                    "modifiers": [{ "name": "Oat milk" }]
                },
                { "name": "Cookie", "quantity": "0.5" },
                { "name": "Mystery", "quantity": "lots" }
            ]
        });

        let order: Order = serde_json::from_value(order).unwrap();
        let items = line_items(&order);
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].line_uid, "li-a");
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].unit_price, 450);
        assert_eq!(items[0].total_price, 900);
        assert_eq!(items[0].modifiers[0]["name"], "Oat milk");

        assert_eq!(items[1].line_uid, "1");
        assert_eq!(items[1].quantity, 1);
        assert_eq!(items[1].category, "unknown");
        assert_eq!(items[2].quantity, 1);
    }

    #[test]
    fn test_order_mapping() {
        let SyncRecord::Order(o) = order_to_record(&json!({
            "id": "ord_9",
            "state": "COMPLETED",
            "total_money": { "amount": 900 },
            "total_tax_money": { "amount": 72 },
            "updated_at": "2025-03-01T14:05:00Z",
            "closed_at": "2025-03-01T14:04:00Z",
            "line_items": [{ "uid": "li-a", "name": "Latte", "quantity": "2", "total_money": { "amount": 900 } }]
        }))
        .unwrap() else {
            panic!("expected an order");
        };

        assert_eq!(o.total_amount, 900);
        assert_eq!(o.tax_amount, 72);
        assert_eq!(o.state.as_deref(), Some("COMPLETED"));
        assert!(o.closed_at.is_some());
        assert_eq!(o.line_items[0]["price"], 900);
        assert_eq!(o.line_items[0]["quantity"], 2);
    }

    #[test]
    fn test_catalog_mapping() {
        let raw = json!({
            "type": "ITEM",
            "id": "ITEM_1",
            "version": 1712345678901i64,
            "is_deleted": false,
            "updated_at": "2025-02-01T00:00:00Z",
            "item_data": { "name": "Cold Brew" }
        });
        let SyncRecord::CatalogObject(c) = catalog_to_record(&raw).unwrap() else {
            panic!("expected a catalog object");
        };
        assert_eq!(c.object_type, "ITEM");
        assert_eq!(c.name.as_deref(), Some("Cold Brew"));
        assert_eq!(c.version, 1712345678901);
        assert_eq!(c.data, raw);

        let deleted = json!({ "type": "TAX", "id": "TAX_1", "is_deleted": true });
        let SyncRecord::CatalogObject(c) = catalog_to_record(&deleted).unwrap() else {
            panic!("expected a catalog object");
        };
        assert!(c.is_deleted);
        assert!(c.name.is_none());
    }

    #[test]
    fn test_customer_mapping() {
        let SyncRecord::Customer(c) = customer_to_record(&json!({
            "id": "CUST_1",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "email_address": "ada@example.com",
            "version": 3,
            "updated_at": "2025-02-01T00:00:00Z"
        }))
        .unwrap() else {
            panic!("expected a customer");
        };
        assert_eq!(c.email.as_deref(), Some("ada@example.com"));
        assert_eq!(c.version, 3);
        assert!(c.phone.is_none());
    }
}

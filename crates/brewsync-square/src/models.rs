//! Square API shapes. Only the fields the sync reads are modelled; every
//! field is optional because Square omits empty ones.
//!
//! Record fields decode leniently: a value of the wrong type reads as absent
//! instead of failing the whole record, so a catalog object with
//! `"is_deleted": null` still syncs with that field left at its default.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// Any value that does not decode as `T` becomes `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Array elements that do not decode are dropped; a non-array is empty.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect()),
        _ => Ok(Vec::new()),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Money {
    #[serde(deserialize_with = "lenient")]
    pub amount: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub currency: Option<String>,
}

/// Cents, or 0 when the money object or its amount is absent.
pub fn cents(money: &Option<Money>) -> i64 {
    money.as_ref().and_then(|m| m.amount).unwrap_or(0)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Payment {
    #[serde(deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub customer_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub location_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub order_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub reference_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub receipt_url: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub source_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub payment_method: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub total_money: Option<Money>,
    #[serde(deserialize_with = "lenient")]
    pub tax_money: Option<Money>,
    #[serde(deserialize_with = "lenient")]
    pub discount_money: Option<Money>,
    #[serde(deserialize_with = "lenient")]
    pub created_at: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrderLineItem {
    #[serde(deserialize_with = "lenient")]
    pub uid: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub quantity: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub variation_name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub catalog_object_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub item_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub base_price_money: Option<Money>,
    #[serde(deserialize_with = "lenient")]
    pub total_money: Option<Money>,
    #[serde(deserialize_with = "lenient")]
    pub modifiers: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub customer_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub location_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    pub line_items: Vec<OrderLineItem>,
    #[serde(deserialize_with = "lenient")]
    pub total_money: Option<Money>,
    #[serde(deserialize_with = "lenient")]
    pub total_tax_money: Option<Money>,
    #[serde(deserialize_with = "lenient")]
    pub total_discount_money: Option<Money>,
    #[serde(deserialize_with = "lenient")]
    pub created_at: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub updated_at: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub closed_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogObject {
    #[serde(deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub object_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub version: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub is_deleted: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Customer {
    #[serde(deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub given_name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub family_name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub email_address: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub phone_number: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub version: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub created_at: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub updated_at: Option<String>,
}

/// A list or search response: one array of records plus a cursor. The array
/// key differs per endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListResponse {
    pub payments: Vec<Value>,
    pub orders: Vec<Value>,
    pub objects: Vec<Value>,
    pub customers: Vec<Value>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetrieveOrderResponse {
    pub order: Option<Order>,
}

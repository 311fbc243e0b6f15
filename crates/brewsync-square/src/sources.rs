//! The four Square endpoints as [`SyncSource`]s.

use std::future::Future;

use brewsync_config::SourceSettings;
use brewsync_core::{
    Error, RawPage, Result, SyncMode, SyncRecord, SyncSource, SyncWindow, TransformResult,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::SquareClient;
use crate::error::SquareError;
use crate::models::{ListResponse, RetrieveOrderResponse};
use crate::transform;

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wrap an API error as a fetch failure, noting whether it is transient.
fn fetch_error(source: &str, err: SquareError) -> Error {
    if err.is_retryable() {
        warn!(source, error = %err, "Transient Square error, the next run will retry");
    }
    Error::fetch(source, err)
}

/// `POST /v2/orders/search`, filtered on `updated_at` and sorted ascending.
#[derive(Clone)]
pub struct OrdersSource {
    client: SquareClient,
    limit: u32,
}

impl OrdersSource {
    const MAX_LIMIT: u32 = 1000;

    pub fn new(client: SquareClient, settings: &SourceSettings) -> Self {
        Self {
            client,
            limit: settings.page_limit.min(Self::MAX_LIMIT),
        }
    }

    fn search_body(&self, window: &SyncWindow, cursor: Option<&str>) -> Value {
        let mut body = json!({
            "query": {
                "filter": {
                    "date_time_filter": {
                        "updated_at": {
                            "start_at": rfc3339(window.start),
                            "end_at": rfc3339(window.end),
                        }
                    }
                },
                "sort": { "sort_field": "UPDATED_AT", "sort_order": "ASC" }
            },
            "return_entries": false,
            "limit": self.limit,
        });
        if let Some(location) = self.client.location_id() {
            body["location_ids"] = json!([location]);
        }
        if let Some(cursor) = cursor {
            body["cursor"] = json!(cursor);
        }
        body
    }
}

impl SyncSource for OrdersSource {
    fn name(&self) -> &str {
        "orders"
    }

    fn ascending(&self) -> bool {
        true
    }

    fn fetch_page(
        &self,
        window: &SyncWindow,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<RawPage>> + Send {
        let body = self.search_body(window, cursor);
        async move {
            let response: ListResponse = self
                .client
                .post("/v2/orders/search", &body)
                .await
                .map_err(|e| fetch_error(self.name(), e))?;
            Ok(RawPage::new(response.orders, response.cursor))
        }
    }

    fn transform(&self, raw: &Value) -> TransformResult<SyncRecord> {
        transform::order_to_record(raw)
    }
}

/// `GET /v2/payments` filtered and sorted by `updated_at`, newest first. The
/// checkpoint advances by `updated_at`, so the window must filter on it too.
/// Each payment's order is fetched to fill in its line items.
#[derive(Clone)]
pub struct PaymentsSource {
    client: SquareClient,
    limit: u32,
}

impl PaymentsSource {
    const MAX_LIMIT: u32 = 100;

    pub fn new(client: SquareClient, settings: &SourceSettings) -> Self {
        Self {
            client,
            limit: settings.page_limit.min(Self::MAX_LIMIT),
        }
    }

    fn query(&self, window: &SyncWindow, cursor: Option<&str>) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("updated_at_begin_time", rfc3339(window.start)),
            ("updated_at_end_time", rfc3339(window.end)),
            ("sort_field", "UPDATED_AT".to_string()),
            ("sort_order", "DESC".to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(location) = self.client.location_id() {
            query.push(("location_id", location.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        query
    }
}

impl SyncSource for PaymentsSource {
    fn name(&self) -> &str {
        "payments"
    }

    fn fetch_page(
        &self,
        window: &SyncWindow,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<RawPage>> + Send {
        let query = self.query(window, cursor);
        async move {
            let response: ListResponse = self
                .client
                .get("/v2/payments", &query)
                .await
                .map_err(|e| fetch_error(self.name(), e))?;
            Ok(RawPage::new(response.payments, response.cursor))
        }
    }

    fn transform(&self, raw: &Value) -> TransformResult<SyncRecord> {
        transform::payment_to_record(raw)
    }

    fn enrich(&self, record: SyncRecord) -> impl Future<Output = SyncRecord> + Send {
        async move {
            let mut transaction = match record {
                SyncRecord::Transaction(transaction) => transaction,
                other => return other,
            };
            let Some(order_id) = transaction.order_id().map(str::to_string) else {
                return SyncRecord::Transaction(transaction);
            };

            let path = format!("/v2/orders/{}", order_id);
            match self.client.get::<RetrieveOrderResponse>(&path, &[]).await {
                Ok(RetrieveOrderResponse { order: Some(order) }) => {
                    transaction.items = transform::line_items(&order);
                    debug!(
                        payment = %transaction.source_id,
                        order = %order_id,
                        items = transaction.items.len(),
                        "Attached order line items"
                    );
                }
                Ok(RetrieveOrderResponse { order: None }) => {
                    warn!(payment = %transaction.source_id, order = %order_id, "Order not found in response");
                }
                Err(e) => {
                    warn!(
                        payment = %transaction.source_id,
                        order = %order_id,
                        error = %e,
                        "Could not fetch order details"
                    );
                }
            }
            SyncRecord::Transaction(transaction)
        }
    }
}

/// `GET /v2/catalog/list` for backfills, `POST /v2/catalog/search` with
/// `begin_time` for deltas.
#[derive(Clone)]
pub struct CatalogSource {
    client: SquareClient,
    types: Vec<String>,
    limit: u32,
}

impl CatalogSource {
    const MAX_LIMIT: u32 = 1000;

    pub fn new(client: SquareClient, settings: &SourceSettings) -> Self {
        Self {
            client,
            types: settings.types.clone(),
            limit: settings.page_limit.min(Self::MAX_LIMIT),
        }
    }
}

impl SyncSource for CatalogSource {
    fn name(&self) -> &str {
        "catalog"
    }

    fn fetch_page(
        &self,
        window: &SyncWindow,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<RawPage>> + Send {
        let mode = window.mode;
        let begin_time = rfc3339(window.start);
        let cursor = cursor.map(str::to_string);

        async move {
            let result = match mode {
                SyncMode::Backfill => {
                    let mut query = vec![("types", self.types.join(","))];
                    if let Some(cursor) = cursor {
                        query.push(("cursor", cursor));
                    }
                    self.client.get::<ListResponse>("/v2/catalog/list", &query).await
                }
                SyncMode::Delta => {
                    let mut body = json!({
                        "object_types": self.types,
                        "begin_time": begin_time,
                        "include_deleted_objects": true,
                        "limit": self.limit,
                    });
                    if let Some(cursor) = cursor {
                        body["cursor"] = json!(cursor);
                    }
                    self.client.post::<_, ListResponse>("/v2/catalog/search", &body).await
                }
            };

            let response = result.map_err(|e| fetch_error(self.name(), e))?;
            Ok(RawPage::new(response.objects, response.cursor))
        }
    }

    fn transform(&self, raw: &Value) -> TransformResult<SyncRecord> {
        transform::catalog_to_record(raw)
    }
}

/// `GET /v2/customers` for backfills, `POST /v2/customers/search` filtered on
/// `updated_at` for deltas.
#[derive(Clone)]
pub struct CustomersSource {
    client: SquareClient,
    limit: u32,
}

impl CustomersSource {
    const MAX_LIMIT: u32 = 100;

    pub fn new(client: SquareClient, settings: &SourceSettings) -> Self {
        Self {
            client,
            limit: settings.page_limit.min(Self::MAX_LIMIT),
        }
    }
}

impl SyncSource for CustomersSource {
    fn name(&self) -> &str {
        "customers"
    }

    fn fetch_page(
        &self,
        window: &SyncWindow,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<RawPage>> + Send {
        let mode = window.mode;
        let start_at = rfc3339(window.start);
        let cursor = cursor.map(str::to_string);

        async move {
            let result = match mode {
                SyncMode::Backfill => {
                    let mut query = vec![("limit", self.limit.to_string())];
                    if let Some(cursor) = cursor {
                        query.push(("cursor", cursor));
                    }
                    self.client.get::<ListResponse>("/v2/customers", &query).await
                }
                SyncMode::Delta => {
                    let mut body = json!({
                        "query": { "filter": { "updated_at": { "start_at": start_at } } },
                        "limit": self.limit,
                    });
                    if let Some(cursor) = cursor {
                        body["cursor"] = json!(cursor);
                    }
                    self.client.post::<_, ListResponse>("/v2/customers/search", &body).await
                }
            };

            let response = result.map_err(|e| fetch_error(self.name(), e))?;
            Ok(RawPage::new(response.customers, response.cursor))
        }
    }

    fn transform(&self, raw: &Value) -> TransformResult<SyncRecord> {
        transform::customer_to_record(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::test_client;
    use brewsync_config::SourceKind;
    use brewsync_core::{MemoryCheckpointStore, MemorySink, SyncEngine};
    use chrono::{Duration, TimeZone};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn backfill() -> SyncWindow {
        SyncWindow::backfill(now(), 5)
    }

    fn delta() -> SyncWindow {
        SyncWindow::resume(now() - Duration::hours(1), Duration::minutes(5), now())
    }

    #[tokio::test]
    async fn test_orders_search_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/orders/search"))
            .and(body_partial_json(json!({
                "location_ids": ["L1"],
                "cursor": "c1",
                "limit": 100,
                "query": {
                    "filter": { "date_time_filter": { "updated_at": {
                        "start_at": "2025-03-05T12:00:00.000Z",
                        "end_at": "2025-03-10T12:00:00.000Z"
                    } } },
                    "sort": { "sort_field": "UPDATED_AT", "sort_order": "ASC" }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orders": [{ "id": "ord_1" }, { "id": "ord_2" }],
                "cursor": "c2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = OrdersSource::new(
            test_client(&server.uri(), Some("L1")),
            &SourceKind::Orders.defaults(),
        );
        let page = source.fetch_page(&backfill(), Some("c1")).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.cursor.as_deref(), Some("c2"));
        assert!(source.ascending());
    }

    #[tokio::test]
    async fn test_payments_query_and_last_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/payments"))
            .and(query_param("updated_at_begin_time", "2025-03-05T12:00:00.000Z"))
            .and(query_param("updated_at_end_time", "2025-03-10T12:00:00.000Z"))
            .and(query_param("sort_field", "UPDATED_AT"))
            .and(query_param("sort_order", "DESC"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payments": [{ "id": "pay_1" }],
                "cursor": ""
            })))
            .mount(&server)
            .await;

        let mut settings = SourceKind::Payments.defaults();
        settings.page_limit = 500;
        let source = PaymentsSource::new(test_client(&server.uri(), None), &settings);

        let page = source.fetch_page(&backfill(), None).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(!page.has_more());
    }

    #[tokio::test]
    async fn test_upstream_failure_is_fetch_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/payments"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let source = PaymentsSource::new(
            test_client(&server.uri(), None),
            &SourceKind::Payments.defaults(),
        );
        let err = source.fetch_page(&backfill(), None).await.unwrap_err();
        assert!(matches!(err, Error::Fetch { ref source_name, .. } if source_name == "payments"));
    }

    #[tokio::test]
    async fn test_payment_enrich_attaches_items() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/orders/ord_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "order": {
                    "id": "ord_9",
                    "line_items": [
                        { "uid": "a", "name": "Latte", "quantity": "1", "total_money": { "amount": 450 } },
                        { "uid": "b", "name": "Scone", "quantity": "2", "total_money": { "amount": 700 } }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let source = PaymentsSource::new(
            test_client(&server.uri(), None),
            &SourceKind::Payments.defaults(),
        );
        let record = source
            .transform(&json!({ "id": "pay_1", "order_id": "ord_9" }))
            .unwrap();
        let SyncRecord::Transaction(t) = source.enrich(record).await else {
            panic!("expected a transaction");
        };
        assert_eq!(t.items.len(), 2);
        assert_eq!(t.items[1].product_name.as_deref(), Some("Scone"));
    }

    #[tokio::test]
    async fn test_payment_enrich_failure_keeps_record() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/orders/ord_gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = PaymentsSource::new(
            test_client(&server.uri(), None),
            &SourceKind::Payments.defaults(),
        );
        let record = source
            .transform(&json!({ "id": "pay_2", "order_id": "ord_gone" }))
            .unwrap();
        let SyncRecord::Transaction(t) = source.enrich(record).await else {
            panic!("expected a transaction");
        };
        assert_eq!(t.source_id, "pay_2");
        assert!(t.items.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_modes() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/catalog/list"))
            .and(query_param("types", "ITEM,CATEGORY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objects": [{ "type": "ITEM", "id": "I1" }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/catalog/search"))
            .and(body_partial_json(json!({
                "object_types": ["ITEM", "CATEGORY"],
                "begin_time": "2025-03-10T10:55:00.000Z"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objects": [{ "type": "ITEM", "id": "I1" }, { "type": "CATEGORY", "id": "C1" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = SourceKind::Catalog.defaults();
        settings.types = vec!["ITEM".into(), "CATEGORY".into()];
        let source = CatalogSource::new(test_client(&server.uri(), None), &settings);

        assert_eq!(source.fetch_page(&backfill(), None).await.unwrap().records.len(), 1);
        assert_eq!(source.fetch_page(&delta(), None).await.unwrap().records.len(), 2);
    }

    #[tokio::test]
    async fn test_customers_modes() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/customers"))
            .and(query_param("cursor", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customers": [{ "id": "CUST_2" }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/customers/search"))
            .and(body_partial_json(json!({
                "query": { "filter": { "updated_at": { "start_at": "2025-03-10T10:55:00.000Z" } } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "customers": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let source = CustomersSource::new(
            test_client(&server.uri(), None),
            &SourceKind::Customers.defaults(),
        );
        assert_eq!(source.fetch_page(&backfill(), Some("next")).await.unwrap().records.len(), 1);
        assert!(source.fetch_page(&delta(), None).await.unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn test_customers_backfill_through_engine() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/customers"))
            .and(query_param("cursor", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customers": [
                    { "id": "CUST_3", "updated_at": "2025-03-09T08:00:00Z" },
                    { "given_name": "no id" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/customers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customers": [
                    { "id": "CUST_1", "updated_at": "2025-03-01T08:00:00Z" },
                    { "id": "CUST_2", "updated_at": "2025-03-02T08:00:00Z" }
                ],
                "cursor": "p2"
            })))
            .mount(&server)
            .await;

        let settings = SourceKind::Customers.defaults();
        let source = CustomersSource::new(test_client(&server.uri(), None), &settings);
        let sink = MemorySink::new();
        let store = MemoryCheckpointStore::new();

        let summary = SyncEngine::new(&source, &sink, &store, settings.sync_options(false, false))
            .run(now())
            .await
            .unwrap();

        assert_eq!(summary.stats.pages, 2);
        assert_eq!(summary.stats.count, 4);
        assert_eq!(summary.stats.upserted, 3);
        assert_eq!(summary.stats.skipped, 1);
        assert_eq!(
            store.get("customers").unwrap().next_start,
            Utc.with_ymd_and_hms(2025, 3, 9, 8, 0, 0).unwrap()
        );
    }
}

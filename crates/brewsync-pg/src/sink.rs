//! Postgres [`RecordSink`].
//!
//! Every write is an upsert on the Square id. Conflicts overwrite business
//! fields and keep the row's own `id` and `created_at`. Amounts arrive in
//! cents and are stored as `NUMERIC(12,2)`.

use std::future::Future;

use brewsync_core::{
    AnalyticsRecord, CatalogRecord, CustomerRecord, OrderRecord, RecordSink, SyncRecord,
    Transaction, UpsertOutcome,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::connect::PgConnection;
use crate::error::PgResult;
use crate::schema::{self, SchemaReport};

const UPSERT_TRANSACTION: &str = r#"
    INSERT INTO transactions (
        id, square_id, customer_id, location_id, total_amount, tax_amount,
        discount_amount, payment_method, status, created_at, updated_at, metadata
    ) VALUES (
        $1, $2, $3, $4,
        $5::BIGINT::NUMERIC / 100, $6::BIGINT::NUMERIC / 100, $7::BIGINT::NUMERIC / 100,
        $8, $9, COALESCE($10::TIMESTAMPTZ, $11::TIMESTAMPTZ, NOW()), $11, $12
    )
    ON CONFLICT (square_id) DO UPDATE SET
        customer_id = EXCLUDED.customer_id,
        location_id = EXCLUDED.location_id,
        total_amount = EXCLUDED.total_amount,
        tax_amount = EXCLUDED.tax_amount,
        discount_amount = EXCLUDED.discount_amount,
        payment_method = EXCLUDED.payment_method,
        status = EXCLUDED.status,
        updated_at = EXCLUDED.updated_at,
        metadata = EXCLUDED.metadata,
        synced_at = NOW()
    RETURNING id, created_at, (xmax = 0) AS inserted
"#;

const UPSERT_ITEM: &str = r#"
    INSERT INTO transaction_items (
        id, transaction_id, line_uid, product_id, product_name, category,
        quantity, unit_price, total_price, modifiers, created_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7,
        $8::BIGINT::NUMERIC / 100, $9::BIGINT::NUMERIC / 100, $10, $11
    )
    ON CONFLICT (transaction_id, line_uid) DO UPDATE SET
        product_id = EXCLUDED.product_id,
        product_name = EXCLUDED.product_name,
        category = EXCLUDED.category,
        quantity = EXCLUDED.quantity,
        unit_price = EXCLUDED.unit_price,
        total_price = EXCLUDED.total_price,
        modifiers = EXCLUDED.modifiers
"#;

const UPSERT_ORDER: &str = r#"
    INSERT INTO orders (
        id, square_id, customer_id, location_id, state, total_amount, tax_amount,
        discount_amount, created_at, updated_at, closed_at, line_items
    ) VALUES (
        $1, $2, $3, $4, $5,
        $6::BIGINT::NUMERIC / 100, $7::BIGINT::NUMERIC / 100, $8::BIGINT::NUMERIC / 100,
        $9, $10, $11, $12
    )
    ON CONFLICT (square_id) DO UPDATE SET
        customer_id = EXCLUDED.customer_id,
        location_id = EXCLUDED.location_id,
        state = EXCLUDED.state,
        total_amount = EXCLUDED.total_amount,
        tax_amount = EXCLUDED.tax_amount,
        discount_amount = EXCLUDED.discount_amount,
        updated_at = EXCLUDED.updated_at,
        closed_at = EXCLUDED.closed_at,
        line_items = EXCLUDED.line_items,
        created_at = COALESCE(orders.created_at, EXCLUDED.created_at),
        synced_at = NOW()
    RETURNING (xmax = 0) AS inserted
"#;

const UPSERT_CATALOG: &str = r#"
    INSERT INTO catalog_objects (square_id, object_type, version, is_deleted, name, updated_at, data)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (square_id) DO UPDATE SET
        object_type = EXCLUDED.object_type,
        version = EXCLUDED.version,
        is_deleted = EXCLUDED.is_deleted,
        name = EXCLUDED.name,
        updated_at = EXCLUDED.updated_at,
        data = EXCLUDED.data,
        synced_at = NOW()
    RETURNING (xmax = 0) AS inserted
"#;

const UPSERT_CUSTOMER: &str = r#"
    INSERT INTO customers (
        id, square_id, given_name, family_name, email, phone, version, created_at, updated_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (square_id) DO UPDATE SET
        given_name = EXCLUDED.given_name,
        family_name = EXCLUDED.family_name,
        email = EXCLUDED.email,
        phone = EXCLUDED.phone,
        version = EXCLUDED.version,
        updated_at = EXCLUDED.updated_at,
        created_at = COALESCE(customers.created_at, EXCLUDED.created_at),
        synced_at = NOW()
    RETURNING (xmax = 0) AS inserted
"#;

fn outcome(inserted: bool) -> UpsertOutcome {
    if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    }
}

/// Writes records to the tables created by [`ensure_schema`](crate::ensure_schema).
pub struct PgSink {
    conn: Mutex<PgConnection>,
}

impl PgSink {
    pub async fn connect(connection_string: &str) -> PgResult<Self> {
        Ok(Self::new(PgConnection::connect(connection_string).await?))
    }

    pub fn new(conn: PgConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Create tables and views.
    pub async fn setup(&self) -> PgResult<SchemaReport> {
        let conn = self.conn.lock().await;
        schema::ensure_schema(conn.client()).await
    }

    pub async fn close(self) {
        self.conn.into_inner().close().await;
    }

    /// The transaction and its items are written atomically.
    async fn write_transaction(&self, t: &Transaction) -> PgResult<UpsertOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn.client_mut().transaction().await?;

        let row = tx
            .query_one(
                UPSERT_TRANSACTION,
                &[
                    &t.id,
                    &t.source_id,
                    &t.customer_id,
                    &t.location_id,
                    &t.total_amount,
                    &t.tax_amount,
                    &t.discount_amount,
                    &t.payment_method,
                    &t.status,
                    &t.created_at,
                    &t.updated_at,
                    &t.metadata,
                ],
            )
            .await?;

        let id: uuid::Uuid = row.get(0);
        let created_at: chrono::DateTime<chrono::Utc> = row.get(1);
        let inserted: bool = row.get(2);

        for item in &t.items {
            tx.execute(
                UPSERT_ITEM,
                &[
                    &item.id,
                    &id,
                    &item.line_uid,
                    &item.product_id,
                    &item.product_name,
                    &item.category,
                    &item.quantity,
                    &item.unit_price,
                    &item.total_price,
                    &item.modifiers,
                    &created_at,
                ],
            )
            .await?;
        }

        tx.commit().await?;

        debug!(
            square_id = %t.source_id,
            items = t.items.len(),
            inserted,
            "Stored transaction"
        );
        Ok(outcome(inserted))
    }

    async fn write_order(&self, o: &OrderRecord) -> PgResult<UpsertOutcome> {
        let conn = self.conn.lock().await;
        let row = conn
            .client()
            .query_one(
                UPSERT_ORDER,
                &[
                    &o.id,
                    &o.source_id,
                    &o.customer_id,
                    &o.location_id,
                    &o.state,
                    &o.total_amount,
                    &o.tax_amount,
                    &o.discount_amount,
                    &o.created_at,
                    &o.updated_at,
                    &o.closed_at,
                    &o.line_items,
                ],
            )
            .await?;
        Ok(outcome(row.get(0)))
    }

    async fn write_catalog(&self, c: &CatalogRecord) -> PgResult<UpsertOutcome> {
        let conn = self.conn.lock().await;
        let row = conn
            .client()
            .query_one(
                UPSERT_CATALOG,
                &[
                    &c.source_id,
                    &c.object_type,
                    &c.version,
                    &c.is_deleted,
                    &c.name,
                    &c.updated_at,
                    &c.data,
                ],
            )
            .await?;
        Ok(outcome(row.get(0)))
    }

    async fn write_customer(&self, c: &CustomerRecord) -> PgResult<UpsertOutcome> {
        let conn = self.conn.lock().await;
        let row = conn
            .client()
            .query_one(
                UPSERT_CUSTOMER,
                &[
                    &c.id,
                    &c.source_id,
                    &c.given_name,
                    &c.family_name,
                    &c.email,
                    &c.phone,
                    &c.version,
                    &c.created_at,
                    &c.updated_at,
                ],
            )
            .await?;
        Ok(outcome(row.get(0)))
    }

    async fn write(&self, record: &SyncRecord) -> PgResult<UpsertOutcome> {
        match record {
            SyncRecord::Transaction(t) => self.write_transaction(t).await,
            SyncRecord::Order(o) => self.write_order(o).await,
            SyncRecord::CatalogObject(c) => self.write_catalog(c).await,
            SyncRecord::Customer(c) => self.write_customer(c).await,
        }
    }

    async fn write_analytics(&self, record: &AnalyticsRecord) -> PgResult<()> {
        let document = serde_json::to_value(record)?;
        let period = record.period.as_str();

        let conn = self.conn.lock().await;
        conn.client()
            .execute(
                "INSERT INTO analytics (period, bucket, source_id, document) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (period, source_id) DO NOTHING",
                &[&period, &record.bucket, &record.source_id, &document],
            )
            .await?;
        Ok(())
    }

    /// Rows in a sink table with this Square id.
    pub async fn count_square_id(&self, table: SinkTable, square_id: &str) -> PgResult<i64> {
        let conn = self.conn.lock().await;
        let row = conn
            .client()
            .query_one(
                &format!("SELECT COUNT(*) FROM {} WHERE square_id = $1", table.name()),
                &[&square_id],
            )
            .await?;
        Ok(row.get(0))
    }
}

/// Tables keyed by Square id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkTable {
    Transactions,
    Orders,
    CatalogObjects,
    Customers,
}

impl SinkTable {
    pub fn name(&self) -> &'static str {
        match self {
            SinkTable::Transactions => "transactions",
            SinkTable::Orders => "orders",
            SinkTable::CatalogObjects => "catalog_objects",
            SinkTable::Customers => "customers",
        }
    }
}

impl RecordSink for PgSink {
    fn upsert(
        &self,
        record: &SyncRecord,
    ) -> impl Future<Output = brewsync_core::Result<UpsertOutcome>> + Send {
        async move { Ok(self.write(record).await?) }
    }

    fn append_analytics(
        &self,
        record: &AnalyticsRecord,
    ) -> impl Future<Output = brewsync_core::Result<()>> + Send {
        async move { Ok(self.write_analytics(record).await?) }
    }
}

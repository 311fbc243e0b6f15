//! Sink tables, reporting views and the checkpoint table.

use tokio_postgres::Client;
use tracing::{debug, info, warn};

use crate::error::PgResult;

pub const CHECKPOINT_TABLE: &str = "__brewsync_checkpoints";

const TABLES: &[(&str, &str)] = &[
    (
        "transactions",
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id UUID PRIMARY KEY,
            square_id TEXT NOT NULL UNIQUE,
            customer_id TEXT,
            location_id TEXT,
            total_amount NUMERIC(12,2) NOT NULL DEFAULT 0,
            tax_amount NUMERIC(12,2) NOT NULL DEFAULT 0,
            discount_amount NUMERIC(12,2) NOT NULL DEFAULT 0,
            payment_method TEXT,
            status TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ,
            metadata JSONB,
            synced_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "transaction_items",
        r#"
        CREATE TABLE IF NOT EXISTS transaction_items (
            id UUID PRIMARY KEY,
            transaction_id UUID NOT NULL REFERENCES transactions(id),
            line_uid TEXT NOT NULL,
            product_id TEXT,
            product_name TEXT,
            category TEXT,
            quantity INTEGER NOT NULL DEFAULT 1,
            unit_price NUMERIC(12,2) NOT NULL DEFAULT 0,
            total_price NUMERIC(12,2) NOT NULL DEFAULT 0,
            modifiers JSONB,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (transaction_id, line_uid)
        )
        "#,
    ),
    (
        "orders",
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id UUID PRIMARY KEY,
            square_id TEXT NOT NULL UNIQUE,
            customer_id TEXT,
            location_id TEXT,
            state TEXT,
            total_amount NUMERIC(12,2) NOT NULL DEFAULT 0,
            tax_amount NUMERIC(12,2) NOT NULL DEFAULT 0,
            discount_amount NUMERIC(12,2) NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ,
            closed_at TIMESTAMPTZ,
            line_items JSONB,
            synced_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "catalog_objects",
        r#"
        CREATE TABLE IF NOT EXISTS catalog_objects (
            square_id TEXT PRIMARY KEY,
            object_type TEXT NOT NULL,
            version BIGINT NOT NULL DEFAULT 0,
            is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
            name TEXT,
            updated_at TIMESTAMPTZ,
            data JSONB,
            synced_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "customers",
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            id UUID PRIMARY KEY,
            square_id TEXT NOT NULL UNIQUE,
            given_name TEXT,
            family_name TEXT,
            email TEXT,
            phone TEXT,
            version BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ,
            synced_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "analytics",
        r#"
        CREATE TABLE IF NOT EXISTS analytics (
            id BIGSERIAL PRIMARY KEY,
            period TEXT NOT NULL,
            bucket TIMESTAMPTZ NOT NULL,
            source_id TEXT NOT NULL,
            document JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (period, source_id)
        )
        "#,
    ),
    (CHECKPOINT_TABLE, CHECKPOINT_DDL),
];

const CHECKPOINT_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS __brewsync_checkpoints (
        source TEXT PRIMARY KEY,
        checkpoint JSONB,
        status TEXT NOT NULL DEFAULT 'idle',
        owner TEXT,
        locked_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    ALTER TABLE __brewsync_checkpoints ADD COLUMN IF NOT EXISTS owner TEXT;
"#;

const VIEWS: &[&str] = &[
    r#"
    CREATE OR REPLACE VIEW daily_sales AS
    SELECT
        DATE(created_at) AS date,
        COUNT(*) AS transaction_count,
        SUM(total_amount) AS total_revenue,
        AVG(total_amount) AS avg_transaction_value,
        COUNT(DISTINCT customer_id) AS unique_customers
    FROM transactions
    WHERE status = 'COMPLETED'
    GROUP BY DATE(created_at)
    "#,
    r#"
    CREATE OR REPLACE VIEW hourly_sales AS
    SELECT
        DATE(created_at) AS date,
        EXTRACT(HOUR FROM created_at) AS hour,
        COUNT(*) AS transaction_count,
        SUM(total_amount) AS total_revenue
    FROM transactions
    WHERE status = 'COMPLETED'
    GROUP BY DATE(created_at), EXTRACT(HOUR FROM created_at)
    "#,
];

/// What [`ensure_schema`] set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaReport {
    /// Whether `transactions` is a TimescaleDB hypertable.
    pub hypertable: bool,
}

/// Create only the checkpoint table.
pub async fn ensure_checkpoint_table(client: &Client) -> PgResult<()> {
    client.batch_execute(CHECKPOINT_DDL).await?;
    Ok(())
}

/// Create all tables and views. Safe to run repeatedly.
pub async fn ensure_schema(client: &Client) -> PgResult<SchemaReport> {
    for (name, ddl) in TABLES {
        debug!(table = name, "Ensuring table");
        client.batch_execute(ddl).await?;
    }

    client
        .batch_execute(
            "CREATE INDEX IF NOT EXISTS idx_orders_updated_at ON orders (updated_at);
             CREATE INDEX IF NOT EXISTS idx_analytics_bucket ON analytics (bucket);
             CREATE UNIQUE INDEX IF NOT EXISTS idx_analytics_period_source \
                 ON analytics (period, source_id);",
        )
        .await?;

    let hypertable = match client
        .batch_execute(
            "SELECT create_hypertable('transactions', 'created_at', \
             if_not_exists => TRUE, migrate_data => TRUE)",
        )
        .await
    {
        Ok(()) => {
            info!("transactions is a TimescaleDB hypertable");
            true
        }
        Err(e) => {
            warn!(error = %e, "TimescaleDB not available, using a plain created_at index");
            client
                .batch_execute(
                    "CREATE INDEX IF NOT EXISTS idx_transactions_created_at \
                     ON transactions (created_at)",
                )
                .await?;
            false
        }
    };

    for view in VIEWS {
        client.batch_execute(view).await?;
    }

    info!(hypertable, "brewsync schema initialized");
    Ok(SchemaReport { hypertable })
}

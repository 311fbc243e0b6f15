//! Postgres sink, schema and checkpoint store for brewsync.

mod checkpoint;
mod connect;
mod error;
mod schema;
mod sink;

pub use checkpoint::PostgresCheckpointStore;
pub use connect::PgConnection;
pub use error::{PgError, PgResult};
pub use schema::{ensure_checkpoint_table, ensure_schema, SchemaReport, CHECKPOINT_TABLE};
pub use sink::{PgSink, SinkTable};

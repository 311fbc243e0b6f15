pub mod config;
pub mod env;
pub mod error;
pub mod source;

pub use config::{
    AnalyticsConfig, CheckpointBackend, CheckpointConfig, PostgresConfig, SquareConfig,
    SquareEnvironment, SyncConfig, DEFAULT_SQUARE_VERSION,
};
pub use env::resolve_env;
pub use error::{ConfigError, ConfigResult};
pub use source::{SourceConfig, SourceKind, SourceSettings, SourcesConfig, DEFAULT_CATALOG_TYPES};

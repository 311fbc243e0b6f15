use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::env::resolve_env;
use crate::error::{ConfigError, ConfigResult};
use crate::source::{SourceKind, SourceSettings, SourcesConfig};

pub const DEFAULT_SQUARE_VERSION: &str = "2025-07-16";

/// Project configuration from brewsync.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub square: SquareConfig,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SquareEnvironment {
    #[default]
    Production,
    Sandbox,
}

impl SquareEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            SquareEnvironment::Production => "https://connect.squareup.com",
            SquareEnvironment::Sandbox => "https://connect.squareupsandbox.com",
        }
    }
}

impl FromStr for SquareEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(SquareEnvironment::Production),
            "sandbox" => Ok(SquareEnvironment::Sandbox),
            other => Err(ConfigError::invalid(
                "square.environment",
                format!("expected production or sandbox, got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SquareConfig {
    /// Bearer token. Supports `${VAR}`.
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub environment: SquareEnvironment,
    /// Value of the `Square-Version` header.
    #[serde(default = "default_square_version")]
    pub version: String,
    pub location_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides the environment's host, mainly for tests.
    pub base_url: Option<String>,
}

fn default_square_version() -> String {
    DEFAULT_SQUARE_VERSION.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for SquareConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            environment: SquareEnvironment::default(),
            version: default_square_version(),
            location_id: None,
            timeout_secs: default_timeout_secs(),
            base_url: None,
        }
    }
}

impl SquareConfig {
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.environment.base_url().to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresConfig {
    /// Supports `${VAR}`.
    #[serde(default)]
    pub connection_string: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// Directory for the file backend.
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
    /// Run locks older than this are taken over.
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: i64,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".brewsync")
}

/// 30 days.
const MAX_LOCK_STALE_SECS: i64 = 30 * 86_400;

fn default_lock_stale_secs() -> i64 {
    3600
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::default(),
            dir: default_checkpoint_dir(),
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl SyncConfig {
    /// Parse a config from a TOML string.
    pub fn parse(toml_str: &str) -> ConfigResult<Self> {
        let config: SyncConfig = toml::from_str(toml_str)?;
        Ok(config)
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Read the file, apply process environment overrides, and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn source(&self, kind: SourceKind) -> SourceSettings {
        self.sources.get(kind).apply(kind.defaults())
    }

    pub fn enabled_sources(&self) -> Vec<SourceSettings> {
        SourceKind::ALL
            .into_iter()
            .map(|kind| self.source(kind))
            .filter(|s| s.enabled)
            .collect()
    }

    /// The resolved Square token. Fails if it is empty.
    pub fn access_token(&self) -> ConfigResult<String> {
        let token = resolve_env(&self.square.access_token);
        if token.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                name: "SQUARE_ACCESS_TOKEN".to_string(),
            });
        }
        Ok(token)
    }

    /// The resolved Postgres connection string. Fails if it is empty.
    pub fn connection_string(&self) -> ConfigResult<String> {
        let conn = resolve_env(&self.postgres.connection_string);
        if conn.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                name: "DATABASE_URL".to_string(),
            });
        }
        Ok(conn)
    }

    /// Check value ranges. Credentials are checked by the accessors, since
    /// not every command needs them.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.square.version.trim().is_empty() {
            return Err(ConfigError::invalid("square.version", "must not be empty"));
        }
        if self.square.timeout_secs == 0 {
            return Err(ConfigError::invalid("square.timeout_secs", "must be non-zero"));
        }
        if !(1..=MAX_LOCK_STALE_SECS).contains(&self.checkpoints.lock_stale_secs) {
            return Err(ConfigError::invalid(
                "checkpoints.lock_stale_secs",
                format!("must be between 1 and {}", MAX_LOCK_STALE_SECS),
            ));
        }
        for kind in SourceKind::ALL {
            self.source(kind).validate()?;
        }
        Ok(())
    }
}

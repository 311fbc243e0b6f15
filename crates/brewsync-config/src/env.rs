//! Environment variable handling: `${VAR}` interpolation and overrides.

use std::path::PathBuf;

use tracing::debug;
use url::Url;

use crate::config::SyncConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::source::SourceKind;

/// Resolve environment variables in a string.
/// Supports ${VAR_NAME} syntax; unset variables become empty. Substituted
/// values are not scanned again.
pub fn resolve_env(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + end];
        result.push_str(&rest[..start]);
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + end + 1..];
    }

    result.push_str(rest);
    result
}

impl SyncConfig {
    /// Apply overrides from the process environment. Empty values are ignored.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_with(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("SQUARE_ACCESS_TOKEN") {
            self.square.access_token = token;
        }
        if let Some(env) = lookup("SQUARE_ENV") {
            self.square.environment = env.parse()?;
        }
        if let Some(version) = lookup("SQUARE_VERSION") {
            self.square.version = version;
        }
        if let Some(location) = lookup("SQUARE_LOCATION_ID") {
            self.square.location_id = Some(location);
        }

        if let Some(days) = lookup("SQ_ORDERS_BACKFILL_DAYS") {
            let days = days.trim().parse::<i64>().map_err(|_| {
                ConfigError::invalid("SQ_ORDERS_BACKFILL_DAYS", format!("not a number: '{}'", days))
            })?;
            self.sources.get_mut(SourceKind::Orders).backfill_days = Some(days);
        }
        if let Some(types) = lookup("SQ_CATALOG_TYPES") {
            let types: Vec<String> = types
                .split(',')
                .map(|t| t.trim().to_ascii_uppercase())
                .filter(|t| !t.is_empty())
                .collect();
            self.sources.get_mut(SourceKind::Catalog).types = Some(types);
        }

        if let Some(url) = lookup("DATABASE_URL") {
            self.postgres.connection_string = url;
        } else if self.postgres.connection_string.trim().is_empty() {
            if let Some(url) = postgres_url_from_parts(&lookup)? {
                debug!("Built connection string from TIMESCALE_*/POSTGRES_* variables");
                self.postgres.connection_string = url;
            }
        }

        if let Some(dir) = lookup("BREWSYNC_DATA_DIR").or_else(|| lookup("DATA_DIR")) {
            self.checkpoints.dir = PathBuf::from(dir);
        }

        Ok(())
    }
}

/// Build a connection URL from `TIMESCALE_*` (or `POSTGRES_*`) parts.
/// `None` unless a host is set.
fn postgres_url_from_parts<F>(lookup: &F) -> ConfigResult<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let part = |name: &str| {
        lookup(&format!("TIMESCALE_{}", name)).or_else(|| lookup(&format!("POSTGRES_{}", name)))
    };

    let Some(host) = part("HOST") else {
        return Ok(None);
    };
    let port = part("PORT").unwrap_or_else(|| "5432".to_string());
    let database = part("DB").unwrap_or_else(|| "cafe".to_string());
    let user = part("USER").unwrap_or_else(|| "postgres".to_string());

    let invalid = |e: url::ParseError| ConfigError::invalid("TIMESCALE_HOST", e.to_string());
    let mut url = Url::parse(&format!("postgresql://{}:{}/{}", host, port, database))
        .map_err(invalid)?;

    url.set_username(&user)
        .map_err(|_| ConfigError::invalid("TIMESCALE_USER", "cannot be used in a URL"))?;
    if let Some(password) = part("PASSWORD") {
        url.set_password(Some(&password))
            .map_err(|_| ConfigError::invalid("TIMESCALE_PASSWORD", "cannot be used in a URL"))?;
    }

    Ok(Some(url.to_string()))
}

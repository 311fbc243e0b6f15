use std::fmt;
use std::str::FromStr;

use brewsync_core::SyncOptions;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Catalog object types fetched when none are configured.
pub const DEFAULT_CATALOG_TYPES: &[&str] = &[
    "ITEM",
    "ITEM_VARIATION",
    "CATEGORY",
    "MODIFIER",
    "MODIFIER_LIST",
    "TAX",
    "DISCOUNT",
    "IMAGE",
];

/// The upstream resources that can be synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Orders,
    Payments,
    Catalog,
    Customers,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Orders,
        SourceKind::Payments,
        SourceKind::Catalog,
        SourceKind::Customers,
    ];

    /// Also the checkpoint key.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Orders => "orders",
            SourceKind::Payments => "payments",
            SourceKind::Catalog => "catalog",
            SourceKind::Customers => "customers",
        }
    }

    /// Built-in settings before any `[sources.<name>]` overrides.
    pub fn defaults(self) -> SourceSettings {
        let (resume_lookback_secs, checkpoint_overlap_secs) = match self {
            SourceKind::Orders => (72 * 3600, 5),
            SourceKind::Payments => (300, 5),
            SourceKind::Catalog | SourceKind::Customers => (300, 0),
        };

        let types = match self {
            SourceKind::Catalog => DEFAULT_CATALOG_TYPES.iter().map(|t| t.to_string()).collect(),
            _ => vec![],
        };

        SourceSettings {
            kind: self,
            enabled: true,
            backfill_days: 1825,
            resume_lookback_secs,
            checkpoint_overlap_secs,
            checkpoint_every_pages: 10,
            max_pages: None,
            page_limit: 100,
            types,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "orders" => Ok(SourceKind::Orders),
            "payments" => Ok(SourceKind::Payments),
            "catalog" => Ok(SourceKind::Catalog),
            "customers" => Ok(SourceKind::Customers),
            _ => Err(ConfigError::UnknownSource(s.to_string())),
        }
    }
}

/// A `[sources.<name>]` table as written. Unset fields take the source's
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub enabled: Option<bool>,
    pub backfill_days: Option<i64>,
    pub resume_lookback_secs: Option<i64>,
    pub checkpoint_overlap_secs: Option<i64>,
    /// Only honored for sources whose pages arrive in ascending order.
    pub checkpoint_every_pages: Option<u64>,
    pub max_pages: Option<u64>,
    pub page_limit: Option<u32>,
    /// Catalog object types.
    pub types: Option<Vec<String>>,
}

impl SourceConfig {
    pub(crate) fn apply(&self, defaults: SourceSettings) -> SourceSettings {
        SourceSettings {
            kind: defaults.kind,
            enabled: self.enabled.unwrap_or(defaults.enabled),
            backfill_days: self.backfill_days.unwrap_or(defaults.backfill_days),
            resume_lookback_secs: self
                .resume_lookback_secs
                .unwrap_or(defaults.resume_lookback_secs),
            checkpoint_overlap_secs: self
                .checkpoint_overlap_secs
                .unwrap_or(defaults.checkpoint_overlap_secs),
            checkpoint_every_pages: self
                .checkpoint_every_pages
                .unwrap_or(defaults.checkpoint_every_pages),
            max_pages: self.max_pages.or(defaults.max_pages),
            page_limit: self.page_limit.unwrap_or(defaults.page_limit),
            types: self.types.clone().unwrap_or(defaults.types),
        }
    }
}

/// The `[sources]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    #[serde(default)]
    pub orders: SourceConfig,
    #[serde(default)]
    pub payments: SourceConfig,
    #[serde(default)]
    pub catalog: SourceConfig,
    #[serde(default)]
    pub customers: SourceConfig,
}

impl SourcesConfig {
    pub fn get(&self, kind: SourceKind) -> &SourceConfig {
        match kind {
            SourceKind::Orders => &self.orders,
            SourceKind::Payments => &self.payments,
            SourceKind::Catalog => &self.catalog,
            SourceKind::Customers => &self.customers,
        }
    }

    pub fn get_mut(&mut self, kind: SourceKind) -> &mut SourceConfig {
        match kind {
            SourceKind::Orders => &mut self.orders,
            SourceKind::Payments => &mut self.payments,
            SourceKind::Catalog => &mut self.catalog,
            SourceKind::Customers => &mut self.customers,
        }
    }
}

/// 100 years.
const MAX_BACKFILL_DAYS: i64 = 36_500;
/// 30 days.
const MAX_OVERLAP_SECS: i64 = 30 * 86_400;

/// Fully resolved settings for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub kind: SourceKind,
    pub enabled: bool,
    pub backfill_days: i64,
    pub resume_lookback_secs: i64,
    pub checkpoint_overlap_secs: i64,
    pub checkpoint_every_pages: u64,
    pub max_pages: Option<u64>,
    pub page_limit: u32,
    pub types: Vec<String>,
}

impl SourceSettings {
    pub fn sync_options(&self, analytics: bool, full: bool) -> SyncOptions {
        SyncOptions {
            backfill_days: self.backfill_days,
            resume_lookback: Duration::seconds(self.resume_lookback_secs),
            checkpoint_overlap: Duration::seconds(self.checkpoint_overlap_secs),
            checkpoint_every_pages: self.checkpoint_every_pages,
            max_pages: self.max_pages,
            analytics,
            full,
        }
    }

    pub(crate) fn validate(&self) -> ConfigResult<()> {
        let field = |name: &str| format!("sources.{}.{}", self.kind, name);

        if !(1..=MAX_BACKFILL_DAYS).contains(&self.backfill_days) {
            return Err(ConfigError::invalid(
                field("backfill_days"),
                format!(
                    "must be between 1 and {}, got {}",
                    MAX_BACKFILL_DAYS, self.backfill_days
                ),
            ));
        }
        if !(1..=1000).contains(&self.page_limit) {
            return Err(ConfigError::invalid(
                field("page_limit"),
                format!("must be between 1 and 1000, got {}", self.page_limit),
            ));
        }
        if self.max_pages == Some(0) {
            return Err(ConfigError::invalid(field("max_pages"), "must be non-zero when set"));
        }
        for (name, secs) in [
            ("resume_lookback_secs", self.resume_lookback_secs),
            ("checkpoint_overlap_secs", self.checkpoint_overlap_secs),
        ] {
            if !(0..=MAX_OVERLAP_SECS).contains(&secs) {
                return Err(ConfigError::invalid(
                    field(name),
                    format!("must be between 0 and {}, got {}", MAX_OVERLAP_SECS, secs),
                ));
            }
        }
        if self.kind == SourceKind::Catalog && self.types.is_empty() {
            return Err(ConfigError::invalid(field("types"), "must list at least one type"));
        }
        Ok(())
    }
}

//! Cache configuration.
//!
//! Controls TTL, table eligibility, and the bundled in-memory backend via
//! `sqlcache.toml`.

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use super::keys::DEFAULT_KEY_PREFIX;

// Default values for cache configuration
const DEFAULT_TTL_MS: u64 = 60_000;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Which cache kinds the read path may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevel {
    Off,
    #[serde(alias = "primary")]
    PrimaryOnly,
    #[serde(alias = "search")]
    SearchOnly,
    #[default]
    All,
}

impl CacheLevel {
    pub fn caches_primary(self) -> bool {
        matches!(self, CacheLevel::PrimaryOnly | CacheLevel::All)
    }

    pub fn caches_search(self) -> bool {
        matches!(self, CacheLevel::SearchOnly | CacheLevel::All)
    }
}

impl FromStr for CacheLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(CacheLevel::Off),
            "primary" | "primary_only" => Ok(CacheLevel::PrimaryOnly),
            "search" | "search_only" => Ok(CacheLevel::SearchOnly),
            "all" => Ok(CacheLevel::All),
            other => Err(format!(
                "unknown cache level `{other}` (expected off|primary|search|all)"
            )),
        }
    }
}

/// Facade configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry time-to-live, enforced by the backend. Zero disables expiry.
    pub ttl: Duration,
    /// Emit per-read debug events.
    pub debug_mode: bool,
    /// Cache kinds used on the read path.
    pub level: CacheLevel,
    /// Allow-list of tables. Empty means every table not denied.
    pub tables: Vec<String>,
    /// Deny-list of tables. Always consulted.
    pub disable_tables: Vec<String>,
    /// Root namespace shared by every instance.
    pub key_prefix: String,
    /// Maximum entries held by the bundled in-memory backend.
    pub memory_capacity: usize,
    /// Cache "record not found" results.
    pub negative_cache: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(DEFAULT_TTL_MS),
            debug_mode: false,
            level: CacheLevel::default(),
            tables: Vec::new(),
            disable_tables: Vec::new(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            negative_cache: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            ttl: settings.ttl,
            debug_mode: settings.debug_mode,
            level: settings.level,
            tables: settings.tables.clone(),
            disable_tables: settings.disable_tables.clone(),
            key_prefix: settings.key_prefix.clone(),
            memory_capacity: settings.memory_capacity.get(),
            negative_cache: settings.negative_cache,
        }
    }
}

impl CacheConfig {
    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_disabled_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disable_tables = tables.into_iter().map(Into::into).collect();
        self
    }
}

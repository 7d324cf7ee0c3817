//! Per-query cache eligibility.

use super::config::CacheConfig;

/// Per-call override carried alongside a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheOverride {
    /// Follow the configured allow/deny lists.
    #[default]
    Inherit,
    /// Cache this query regardless of table policy.
    ForceEnable,
    /// Never cache this query.
    ForceDisable,
}

/// Decide whether caching applies to a query against `table`.
///
/// An explicit override always wins. Otherwise the deny-list is checked first
/// and a non-empty allow-list further restricts the eligible tables.
pub fn should_cache(cache: CacheOverride, table: &str, config: &CacheConfig) -> bool {
    match cache {
        CacheOverride::ForceEnable => return true,
        CacheOverride::ForceDisable => return false,
        CacheOverride::Inherit => {}
    }

    if contains(&config.disable_tables, table) {
        return false;
    }
    if config.tables.is_empty() {
        return true;
    }
    contains(&config.tables, table)
}

fn contains(tables: &[String], table: &str) -> bool {
    tables.iter().any(|candidate| candidate == table)
}

//! Read-path outcomes.
//!
//! A cache hit is a successful result that lets the caller skip the real
//! executor. It is carried as a tag on the returned value, never as an error.

use std::fmt;

/// Which kind of cache hit served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitKind {
    /// The record was previously confirmed absent and that absence was cached.
    NotFound,
    /// Served from the primary-key cache.
    Primary,
    /// Served from the search (query) cache.
    Search,
    /// Joined a load already in flight for the same key.
    Coalesced,
}

impl HitKind {
    pub const ALL: [HitKind; 4] = [
        HitKind::NotFound,
        HitKind::Primary,
        HitKind::Search,
        HitKind::Coalesced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HitKind::NotFound => "not_found",
            HitKind::Primary => "primary",
            HitKind::Search => "search",
            HitKind::Coalesced => "coalesced",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            HitKind::NotFound => 0,
            HitKind::Primary => 1,
            HitKind::Search => 2,
            HitKind::Coalesced => 3,
        }
    }
}

impl fmt::Display for HitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a read-through value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache(HitKind),
    /// The loader ran (cache miss, bypass, or degraded cache).
    Store,
}

/// Result of a read-through fetch. `value` is `None` when the record does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub source: Source,
    pub value: Option<T>,
}

impl<T> Fetched<T> {
    pub(crate) fn cached(kind: HitKind, value: Option<T>) -> Self {
        Self {
            source: Source::Cache(kind),
            value,
        }
    }

    pub(crate) fn loaded(value: Option<T>) -> Self {
        Self {
            source: Source::Store,
            value,
        }
    }

    /// The hit kind, if the value did not come from the loader.
    pub fn hit(&self) -> Option<HitKind> {
        match self.source {
            Source::Cache(kind) => Some(kind),
            Source::Store => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

/// Result of [`QueryCache::before_query`](super::QueryCache::before_query).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Caching does not apply to this query; run it directly.
    Bypass,
    /// Not cached; run the query, then call `after_query`.
    Miss,
    /// Cached. `payload` is the serialized value, `None` for a negative hit.
    Hit {
        kind: HitKind,
        payload: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_kind_indices_are_dense() {
        let mut seen = [false; 4];
        for kind in HitKind::ALL {
            seen[kind.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn fetched_reports_hit_kind() {
        let hit = Fetched::cached(HitKind::Search, Some(1));
        assert_eq!(hit.hit(), Some(HitKind::Search));

        let loaded: Fetched<i32> = Fetched::loaded(None);
        assert_eq!(loaded.hit(), None);
        assert!(loaded.into_value().is_none());
    }
}

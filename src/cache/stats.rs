//! Hit counters.
//!
//! Lock-free per-kind counters living as long as the facade that owns them.
//! Every increment is also forwarded to the `metrics` facade.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

use super::outcome::HitKind;

const METRIC_HIT_TOTAL: &str = "sqlcache_hit_total";
const METRIC_MISS_TOTAL: &str = "sqlcache_miss_total";

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: [AtomicU64; 4],
    misses: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub not_found_hits: u64,
    pub primary_hits: u64,
    pub search_hits: u64,
    pub coalesced_hits: u64,
    pub misses: u64,
}

impl StatsSnapshot {
    pub fn hits(&self) -> u64 {
        self.not_found_hits + self.primary_hits + self.search_hits + self.coalesced_hits
    }

    /// Hit rate in `0.0..=1.0`; zero when nothing was read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, kind: HitKind) {
        self.hits[kind.index()].fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_HIT_TOTAL, "kind" => kind.as_str()).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_MISS_TOTAL).increment(1);
    }

    /// Total hits across every kind.
    pub fn hit_count(&self) -> u64 {
        self.hits
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .sum()
    }

    pub fn hit_count_of(&self, kind: HitKind) -> u64 {
        self.hits[kind.index()].load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn reset_hit_count(&self) {
        for counter in &self.hits {
            counter.store(0, Ordering::Relaxed);
        }
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            not_found_hits: self.hit_count_of(HitKind::NotFound),
            primary_hits: self.hit_count_of(HitKind::Primary),
            search_hits: self.hit_count_of(HitKind::Search),
            coalesced_hits: self.hit_count_of(HitKind::Coalesced),
            misses: self.miss_count(),
        }
    }
}

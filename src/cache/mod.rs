//! Read-through SQL query cache.
//!
//! Two kinds of entries share one backend:
//!
//! - **Primary**: one row addressed by table and primary key
//! - **Search**: the result of one parameterized query against a table
//!
//! Reads are served through [`QueryCache`]; concurrent identical misses are
//! coalesced into a single load. Committed writes invalidate the affected
//! rows and every cached search over the table.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `sqlcache.toml`:
//!
//! ```toml
//! [cache]
//! ttl_ms = 60000
//! level = "all"
//! tables = []
//! disable_tables = ["audit_log"]
//! # ... see config.rs for all options
//! ```

mod codec;
mod config;
mod error;
mod facade;
mod flight;
mod invalidation;
mod keys;
mod lock;
mod outcome;
mod policy;
mod stats;
pub mod storage;

pub use codec::{JsonCodec, ValueCodec};
pub use config::{CacheConfig, CacheLevel};
pub use error::{CacheError, SharedError};
pub use facade::{ABSENT_MARKER, CachedRow, Query, QueryCache};
pub use flight::{Flight, SingleFlight};
pub use invalidation::{InvalidationManager, WriteKind};
pub use keys::{DEFAULT_KEY_PREFIX, KeyCodec, fingerprint};
pub use outcome::{Fetched, HitKind, Lookup, Source};
pub use policy::{CacheOverride, should_cache};
pub use stats::{CacheStats, StatsSnapshot};
pub use storage::{Kv, MemoryStore, StorageBackend, StorageConfig};

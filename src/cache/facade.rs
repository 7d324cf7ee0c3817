//! Read-through query cache.
//!
//! [`QueryCache`] is the single entry point the data-access layer talks to.
//! Reads go through [`QueryCache::fetch_search`] / [`QueryCache::fetch_primary`]
//! (or the split [`QueryCache::before_query`] / [`QueryCache::after_query`]
//! pair when the caller runs the query itself). Committed writes are reported
//! through the `after_*` hooks, which invalidate before returning.
//!
//! Cache faults never fail a read: they are logged and the loader runs
//! instead. Invalidation faults are returned, since a missed invalidation
//! leaves stale data behind.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::codec::{JsonCodec, ValueCodec};
use super::config::CacheConfig;
use super::error::CacheError;
use super::flight::{Flight, SingleFlight};
use super::invalidation::{InvalidationManager, WriteKind};
use super::keys::KeyCodec;
use super::outcome::{Fetched, HitKind, Lookup, Source};
use super::policy::{CacheOverride, should_cache};
use super::stats::CacheStats;
use super::storage::{Kv, MemoryStore, StorageBackend, StorageConfig};

const METRIC_LOAD_MS: &str = "sqlcache_load_ms";

/// Stored in place of a payload when a lookup confirmed the record absent.
pub const ABSENT_MARKER: &str = "\u{1}sqlcache:absent";

/// A row that can be addressed in the primary-key cache.
pub trait CachedRow {
    fn primary_key(&self) -> String;
}

/// A read issued against one table.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    pub table: &'a str,
    pub sql: &'a str,
    pub args: &'a [Value],
    pub cache: CacheOverride,
}

impl<'a> Query<'a> {
    pub fn new(table: &'a str, sql: &'a str, args: &'a [Value]) -> Self {
        Self {
            table,
            sql,
            args,
            cache: CacheOverride::Inherit,
        }
    }

    /// Cache this query even if its table is not eligible.
    pub fn use_cache(mut self) -> Self {
        self.cache = CacheOverride::ForceEnable;
        self
    }

    /// Never cache this query.
    pub fn disable_cache(mut self) -> Self {
        self.cache = CacheOverride::ForceDisable;
        self
    }
}

enum Cached {
    Value(String),
    Absent,
}

pub struct QueryCache<C = JsonCodec> {
    config: CacheConfig,
    instance_id: String,
    keys: KeyCodec,
    backend: Arc<dyn StorageBackend>,
    codec: C,
    stats: CacheStats,
    invalidation: InvalidationManager,
    flights: SingleFlight<Option<String>>,
}

impl QueryCache<JsonCodec> {
    /// Facade over a fresh bounded in-memory backend.
    pub async fn in_memory(config: CacheConfig) -> Result<Self, CacheError> {
        Self::new(config, None, JsonCodec).await
    }
}

impl<C: ValueCodec> QueryCache<C> {
    /// Build a facade and initialize its backend. Without an injected
    /// backend a [`MemoryStore`] sized by `config.memory_capacity` is used.
    pub async fn new(
        config: CacheConfig,
        backend: Option<Arc<dyn StorageBackend>>,
        codec: C,
    ) -> Result<Self, CacheError> {
        if config.key_prefix.is_empty() || config.key_prefix.contains(':') {
            return Err(CacheError::init(format!(
                "invalid key prefix `{}`",
                config.key_prefix
            )));
        }

        let backend: Arc<dyn StorageBackend> = match backend {
            Some(backend) => backend,
            None => Arc::new(MemoryStore::from_config(&config)),
        };
        backend
            .init(&StorageConfig {
                ttl: config.ttl,
                debug: config.debug_mode,
            })
            .await?;

        let instance_id = Uuid::new_v4().simple().to_string();
        let keys = KeyCodec::new(config.key_prefix.clone());
        let invalidation =
            InvalidationManager::new(Arc::clone(&backend), keys.clone(), instance_id.clone());

        debug!(
            instance_id = %instance_id,
            prefix = %config.key_prefix,
            level = ?config.level,
            "Query cache ready"
        );

        Ok(Self {
            config,
            instance_id,
            keys,
            backend,
            codec,
            stats: CacheStats::new(),
            invalidation,
            flights: SingleFlight::new(),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The key prefix every entry of this facade lives under.
    pub fn name(&self) -> &str {
        self.keys.prefix()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn keys(&self) -> &KeyCodec {
        &self.keys
    }

    pub fn should_cache(&self, query: &Query<'_>) -> bool {
        should_cache(query.cache, query.table, &self.config)
    }

    fn search_enabled(&self, query: &Query<'_>) -> bool {
        self.config.level.caches_search() && self.should_cache(query)
    }

    fn primary_enabled(&self, query: &Query<'_>) -> bool {
        self.config.level.caches_primary() && self.should_cache(query)
    }

    fn search_key_of(&self, query: &Query<'_>) -> String {
        self.keys
            .search_key(&self.instance_id, query.table, query.sql, query.args)
    }

    fn primary_key_of(&self, table: &str, primary_key: &str) -> String {
        self.keys.primary_key(&self.instance_id, table, primary_key)
    }

    // ---- read path ----

    /// Look the query up in the search cache without loading anything.
    pub async fn before_query(&self, query: &Query<'_>) -> Lookup {
        if !self.search_enabled(query) {
            return Lookup::Bypass;
        }
        let key = self.search_key_of(query);
        match self.probe(&key).await {
            Ok(Some(Cached::Value(payload))) => {
                self.record_hit(HitKind::Search, query.table, &key);
                Lookup::Hit {
                    kind: HitKind::Search,
                    payload: Some(payload),
                }
            }
            Ok(Some(Cached::Absent)) => {
                self.record_hit(HitKind::NotFound, query.table, &key);
                Lookup::Hit {
                    kind: HitKind::NotFound,
                    payload: None,
                }
            }
            Ok(None) => {
                self.record_miss(query.table, &key);
                Lookup::Miss
            }
            Err(err) => {
                warn!(
                    table = query.table,
                    key = %key,
                    error = %err,
                    "Cache lookup failed; treating as miss"
                );
                self.stats.record_miss();
                Lookup::Miss
            }
        }
    }

    /// Store the result the caller obtained after a [`Lookup::Miss`].
    /// `None` records the absence when negative caching is on.
    pub async fn after_query<T: Serialize>(&self, query: &Query<'_>, value: Option<&T>) {
        if !self.search_enabled(query) {
            return;
        }
        let key = self.search_key_of(query);
        let epoch = self.invalidation.epoch(query.table);
        if let Err(err) = self.populate(query.table, &key, value, epoch).await {
            warn!(table = query.table, key = %key, error = %err, "Failed to populate search cache");
        }
    }

    /// Read-through over the search cache, with concurrent identical reads
    /// coalesced into one `load`.
    pub async fn fetch_search<T, F, Fut, E>(
        &self,
        query: &Query<'_>,
        load: F,
    ) -> Result<Fetched<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        if !self.search_enabled(query) {
            return Self::load_direct(load).await;
        }
        let key = self.search_key_of(query);
        self.read_through(HitKind::Search, query.table, &key, load)
            .await
    }

    /// Read-through over the primary-key cache for the row `primary_key`.
    pub async fn fetch_primary<T, F, Fut, E>(
        &self,
        query: &Query<'_>,
        primary_key: &str,
        load: F,
    ) -> Result<Fetched<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        if !self.primary_enabled(query) {
            return Self::load_direct(load).await;
        }
        let key = self.primary_key_of(query.table, primary_key);
        self.read_through(HitKind::Primary, query.table, &key, load)
            .await
    }

    async fn load_direct<T, F, Fut, E>(load: F) -> Result<Fetched<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let value = load().await.map_err(CacheError::load)?;
        Ok(Fetched::loaded(value))
    }

    async fn read_through<T, F, Fut, E>(
        &self,
        kind: HitKind,
        table: &str,
        key: &str,
        load: F,
    ) -> Result<Fetched<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        if let Some(fetched) = self.cached::<T>(kind, table, key).await {
            return Ok(fetched);
        }

        let mut pending = Some(load);
        let mut led: Option<Fetched<T>> = None;
        let outcome = {
            let pending = &mut pending;
            let led = &mut led;
            self.flights
                .run(key, || async move {
                    // Another leader may have populated the key since the first check.
                    if let Some(fetched) = self.cached_quiet::<T>(kind, key).await {
                        let payload = match &fetched.value {
                            Some(value) => Some(self.codec.encode(value)?),
                            None => None,
                        };
                        *led = Some(fetched);
                        return Ok(payload);
                    }
                    let Some(load) = pending.take() else {
                        return Err(CacheError::abandoned(key));
                    };
                    let epoch = self.invalidation.epoch(table);
                    let started = Instant::now();
                    let value = load().await.map_err(CacheError::load)?;
                    histogram!(METRIC_LOAD_MS).record(started.elapsed().as_secs_f64() * 1000.0);
                    let stored = self.populate(table, key, value.as_ref(), epoch).await;
                    *led = Some(Fetched::loaded(value));
                    stored
                })
                .await
        };

        if let Some(fetched) = led {
            match fetched.source {
                Source::Cache(hit) => self.record_hit(hit, table, key),
                Source::Store => {
                    self.record_miss(table, key);
                    if let Err(err) = outcome {
                        warn!(table, key, error = %err, "Failed to populate cache after load");
                    }
                }
            }
            return Ok(fetched);
        }

        let fault = match outcome {
            Ok(Flight::Joined(payload)) => match self.decode_payload::<T>(payload.as_deref()) {
                Ok(value) => {
                    self.record_hit(HitKind::Coalesced, table, key);
                    return Ok(Fetched::cached(HitKind::Coalesced, value));
                }
                Err(err) => err,
            },
            Ok(Flight::Led(_)) => CacheError::abandoned(key),
            Err(err @ CacheError::Load(_)) => return Err(err),
            Err(err) => err,
        };

        warn!(table, key, error = %fault, "Coalesced read failed; loading directly");
        let Some(load) = pending.take() else {
            return Err(fault);
        };
        self.record_miss(table, key);
        let epoch = self.invalidation.epoch(table);
        let value = load().await.map_err(CacheError::load)?;
        if let Err(err) = self.populate(table, key, value.as_ref(), epoch).await {
            warn!(table, key, error = %err, "Failed to populate cache after load");
        }
        Ok(Fetched::loaded(value))
    }

    /// Serve `key` from the cache, recording the hit. Faults read as a miss.
    async fn cached<T: DeserializeOwned>(
        &self,
        kind: HitKind,
        table: &str,
        key: &str,
    ) -> Option<Fetched<T>> {
        let fetched = self.cached_quiet(kind, key).await?;
        if let Source::Cache(hit) = fetched.source {
            self.record_hit(hit, table, key);
        }
        Some(fetched)
    }

    async fn cached_quiet<T: DeserializeOwned>(
        &self,
        kind: HitKind,
        key: &str,
    ) -> Option<Fetched<T>> {
        match self.probe(key).await {
            Ok(Some(Cached::Absent)) => Some(Fetched::cached(HitKind::NotFound, None)),
            Ok(Some(Cached::Value(payload))) => match self.codec.decode(&payload) {
                Ok(value) => Some(Fetched::cached(kind, Some(value))),
                Err(err) => {
                    warn!(key, error = %err, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "Cache lookup failed; loading instead");
                None
            }
        }
    }

    async fn probe(&self, key: &str) -> Result<Option<Cached>, CacheError> {
        match self.backend.get_value(key).await {
            Ok(payload) if payload == ABSENT_MARKER => Ok(Some(Cached::Absent)),
            Ok(payload) => Ok(Some(Cached::Value(payload))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Write `value` under `key` and return the payload shared with followers.
    /// A backend write fault is logged; only encoding faults are returned.
    ///
    /// `epoch` is the table's invalidation epoch from before `value` was
    /// loaded. If the table was invalidated since, nothing is stored.
    async fn populate<T: Serialize>(
        &self,
        table: &str,
        key: &str,
        value: Option<&T>,
        epoch: u64,
    ) -> Result<Option<String>, CacheError> {
        let (stored, shared) = match value {
            Some(value) => {
                let payload = self.codec.encode(value)?;
                (payload.clone(), Some(payload))
            }
            None if self.config.negative_cache => (ABSENT_MARKER.to_string(), None),
            None => return Ok(None),
        };
        if self.invalidation.epoch(table) != epoch {
            debug!(table, key, "Table invalidated during load; not caching result");
            return Ok(shared);
        }
        if let Err(err) = self.backend.set_key(Kv::new(key, stored)).await {
            warn!(key, error = %err, "Failed to store cache entry");
            return Ok(shared);
        }
        // An invalidation that raced the write above may have run its deletes first.
        if self.invalidation.epoch(table) != epoch
            && let Err(err) = self.backend.delete_key(key).await
        {
            warn!(key, error = %err, "Failed to drop entry stored during invalidation");
        }
        Ok(shared)
    }

    fn decode_payload<T: DeserializeOwned>(
        &self,
        payload: Option<&str>,
    ) -> Result<Option<T>, CacheError> {
        payload.map(|payload| self.codec.decode(payload)).transpose()
    }

    fn record_hit(&self, kind: HitKind, table: &str, key: &str) {
        self.stats.record_hit(kind);
        if self.config.debug_mode {
            debug!(table, key, kind = kind.as_str(), "Cache hit");
        }
    }

    fn record_miss(&self, table: &str, key: &str) {
        self.stats.record_miss();
        if self.config.debug_mode {
            debug!(table, key, "Cache miss");
        }
    }

    // ---- raw access ----

    /// Cached rows for every key in `primary_keys`, or `None` unless all of
    /// them are present.
    pub async fn get_primary<T: DeserializeOwned>(
        &self,
        table: &str,
        primary_keys: &[String],
    ) -> Result<Option<Vec<T>>, CacheError> {
        let keys: Vec<String> = primary_keys
            .iter()
            .map(|pk| self.primary_key_of(table, pk))
            .collect();
        if !self.backend.batch_key_exist(&keys).await? {
            return Ok(None);
        }
        let payloads = match self.backend.batch_get_values(&keys).await {
            Ok(payloads) => payloads,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        let mut rows = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            if payload == ABSENT_MARKER {
                return Ok(None);
            }
            rows.push(self.codec.decode(payload)?);
        }
        Ok(Some(rows))
    }

    pub async fn batch_set_primary_cache<R>(
        &self,
        table: &str,
        rows: &[R],
    ) -> Result<(), CacheError>
    where
        R: CachedRow + Serialize,
    {
        let mut kvs = Vec::with_capacity(rows.len());
        for row in rows {
            let key = self.primary_key_of(table, &row.primary_key());
            kvs.push(Kv::new(key, self.codec.encode(row)?));
        }
        self.backend.batch_set_keys(kvs).await
    }

    pub async fn set_search_cache<T: Serialize>(
        &self,
        table: &str,
        sql: &str,
        args: &[Value],
        value: &T,
    ) -> Result<(), CacheError> {
        let key = self.keys.search_key(&self.instance_id, table, sql, args);
        let payload = self.codec.encode(value)?;
        self.backend.set_key(Kv::new(key, payload)).await
    }

    /// `None` when the query is not cached or was cached as absent.
    pub async fn get_search_cache<T: DeserializeOwned>(
        &self,
        table: &str,
        sql: &str,
        args: &[Value],
    ) -> Result<Option<T>, CacheError> {
        let key = self.keys.search_key(&self.instance_id, table, sql, args);
        match self.probe(&key).await? {
            Some(Cached::Value(payload)) => self.codec.decode(&payload).map(Some),
            Some(Cached::Absent) | None => Ok(None),
        }
    }

    pub async fn primary_key_exists(
        &self,
        table: &str,
        primary_key: &str,
    ) -> Result<bool, CacheError> {
        self.backend
            .key_exists(&self.primary_key_of(table, primary_key))
            .await
    }

    pub async fn batch_primary_key_exists(
        &self,
        table: &str,
        primary_keys: &[String],
    ) -> Result<bool, CacheError> {
        let keys: Vec<String> = primary_keys
            .iter()
            .map(|pk| self.primary_key_of(table, pk))
            .collect();
        self.backend.batch_key_exist(&keys).await
    }

    pub async fn search_key_exists(
        &self,
        table: &str,
        sql: &str,
        args: &[Value],
    ) -> Result<bool, CacheError> {
        let key = self.keys.search_key(&self.instance_id, table, sql, args);
        self.backend.key_exists(&key).await
    }

    // ---- write path ----

    /// Invalidate after rows were inserted into `table`.
    pub async fn after_create<R: CachedRow>(
        &self,
        table: &str,
        rows: &[R],
    ) -> Result<(), CacheError> {
        self.after_write(WriteKind::Create, table, &primary_keys_of(rows))
            .await
    }

    pub async fn after_update<R: CachedRow>(
        &self,
        table: &str,
        rows: &[R],
    ) -> Result<(), CacheError> {
        self.after_write(WriteKind::Update, table, &primary_keys_of(rows))
            .await
    }

    pub async fn after_delete<R: CachedRow>(
        &self,
        table: &str,
        rows: &[R],
    ) -> Result<(), CacheError> {
        self.after_write(WriteKind::Delete, table, &primary_keys_of(rows))
            .await
    }

    /// Invalidate after a committed write, given the affected primary keys.
    #[instrument(skip(self, primary_keys), fields(rows = primary_keys.len()))]
    pub async fn after_write(
        &self,
        kind: WriteKind,
        table: &str,
        primary_keys: &[String],
    ) -> Result<(), CacheError> {
        self.invalidation.on_write(kind, table, primary_keys).await
    }

    // ---- administration ----

    /// Wipe the whole backend and zero the hit counters.
    #[instrument(skip(self))]
    pub async fn reset_cache(&self) -> Result<(), CacheError> {
        self.invalidation.reset(&self.stats).await
    }

    #[instrument(skip(self))]
    pub async fn invalidate_search_cache(&self, table: &str) -> Result<(), CacheError> {
        self.invalidation.invalidate_search(table).await
    }

    #[instrument(skip(self))]
    pub async fn invalidate_primary_cache(
        &self,
        table: &str,
        primary_key: &str,
    ) -> Result<(), CacheError> {
        self.invalidation.invalidate_primary(table, primary_key).await
    }

    #[instrument(skip(self, primary_keys))]
    pub async fn batch_invalidate_primary_cache(
        &self,
        table: &str,
        primary_keys: &[String],
    ) -> Result<(), CacheError> {
        self.invalidation
            .batch_invalidate_primary(table, primary_keys)
            .await
    }

    #[instrument(skip(self))]
    pub async fn invalidate_all_primary_cache(&self, table: &str) -> Result<(), CacheError> {
        self.invalidation.invalidate_all_primary(table).await
    }

    pub fn reset_hit_count(&self) {
        self.stats.reset_hit_count();
    }
}

fn primary_keys_of<R: CachedRow>(rows: &[R]) -> Vec<String> {
    rows.iter().map(CachedRow::primary_key).collect()
}

//! End-to-end read-through and invalidation behavior of the query cache.
//!
//! Every test drives the public facade against the bundled in-memory backend,
//! sharing one backend between facades where namespacing is under test.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlcache::cache::{
    CacheConfig, CacheError, CachedRow, HitKind, JsonCodec, Kv, Lookup, MemoryStore, Query,
    QueryCache, Source, StorageBackend, StorageConfig, WriteKind,
};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u64,
    total_cents: i64,
}

impl CachedRow for Order {
    fn primary_key(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    email: String,
}

impl CachedRow for User {
    fn primary_key(&self) -> String {
        self.id.to_string()
    }
}

fn user(id: u64) -> User {
    User {
        id,
        email: format!("user{id}@example.com"),
    }
}

async fn shared_facades() -> (QueryCache, QueryCache) {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStore::default());
    let a = QueryCache::new(CacheConfig::default(), Some(Arc::clone(&backend)), JsonCodec)
        .await
        .expect("facade a");
    let b = QueryCache::new(CacheConfig::default(), Some(backend), JsonCodec)
        .await
        .expect("facade b");
    (a, b)
}

#[tokio::test]
async fn update_invalidates_primary_and_search_entries() {
    let cache = QueryCache::in_memory(CacheConfig::default())
        .await
        .expect("cache");
    let args = [json!(1)];
    let query = Query::new("users", "SELECT * FROM users WHERE id = ?", &args);

    let listed = cache
        .fetch_search(&query, || async { Ok::<_, CacheError>(Some(vec![user(1)])) })
        .await
        .expect("search");
    let row = cache
        .fetch_primary(&query, "1", || async { Ok::<_, CacheError>(Some(user(1))) })
        .await
        .expect("primary");
    assert_eq!(listed.source, Source::Store);
    assert_eq!(row.source, Source::Store);

    let search_key = cache
        .keys()
        .search_key(cache.instance_id(), "users", query.sql, query.args);
    let primary_key = cache.keys().primary_key(cache.instance_id(), "users", "1");
    assert_ne!(search_key, primary_key);
    assert!(cache.primary_key_exists("users", "1").await.expect("exists"));
    assert!(
        cache
            .search_key_exists("users", query.sql, query.args)
            .await
            .expect("exists")
    );

    cache
        .after_update("users", &[user(1)])
        .await
        .expect("invalidate");

    assert!(!cache.primary_key_exists("users", "1").await.expect("exists"));
    assert_eq!(cache.before_query(&query).await, Lookup::Miss);

    let reloaded = cache
        .fetch_primary(&query, "1", || async { Ok::<_, CacheError>(Some(user(1))) })
        .await
        .expect("primary");
    assert_eq!(reloaded.source, Source::Store);
}

#[tokio::test]
async fn writes_leave_other_tables_warm() {
    let cache = QueryCache::in_memory(CacheConfig::default())
        .await
        .expect("cache");
    let no_args: [Value; 0] = [];
    cache
        .set_search_cache("users", "SELECT * FROM users", &no_args, &vec![user(1)])
        .await
        .expect("seed users");
    cache
        .set_search_cache("orders", "SELECT * FROM orders", &no_args, &Vec::<Order>::new())
        .await
        .expect("seed orders");

    cache
        .after_delete("users", &[user(1)])
        .await
        .expect("invalidate");

    assert!(
        !cache
            .search_key_exists("users", "SELECT * FROM users", &no_args)
            .await
            .expect("exists")
    );
    assert!(
        cache
            .search_key_exists("orders", "SELECT * FROM orders", &no_args)
            .await
            .expect("exists")
    );
}

#[tokio::test]
async fn facades_sharing_a_backend_are_isolated() {
    let (a, b) = shared_facades().await;
    assert_ne!(a.instance_id(), b.instance_id());

    let orders = vec![Order {
        id: 7,
        total_cents: 1_250,
    }];
    for cache in [&a, &b] {
        cache
            .batch_set_primary_cache("orders", &orders)
            .await
            .expect("seed primary");
        cache
            .set_search_cache("orders", "SELECT * FROM orders", &[], &orders)
            .await
            .expect("seed search");
    }

    a.invalidate_search_cache("orders").await.expect("search");
    a.invalidate_all_primary_cache("orders")
        .await
        .expect("primary");

    assert!(!a.primary_key_exists("orders", "7").await.expect("exists"));
    assert!(b.primary_key_exists("orders", "7").await.expect("exists"));
    assert!(
        b.search_key_exists("orders", "SELECT * FROM orders", &[])
            .await
            .expect("exists")
    );
    let warm: Option<Vec<Order>> = b
        .get_search_cache("orders", "SELECT * FROM orders", &[])
        .await
        .expect("get");
    assert_eq!(warm, Some(orders));
}

#[tokio::test]
async fn reset_wipes_every_instance() {
    let (a, b) = shared_facades().await;
    b.batch_set_primary_cache("users", &[user(1)])
        .await
        .expect("seed");

    a.reset_cache().await.expect("reset");

    assert!(!b.primary_key_exists("users", "1").await.expect("exists"));
}

#[tokio::test]
async fn batch_existence_requires_every_key() {
    let store = MemoryStore::default();
    store
        .init(&StorageConfig {
            ttl: Duration::from_secs(60),
            debug: false,
        })
        .await
        .expect("init");

    let keys: Vec<String> = (1..=5).map(|id| format!("sqlcache:i:users:p:{id}")).collect();
    store
        .batch_set_keys(
            keys[..4]
                .iter()
                .map(|key| Kv::new(key.clone(), "{}"))
                .collect(),
        )
        .await
        .expect("seed");
    assert!(!store.batch_key_exist(&keys).await.expect("batch exists"));

    store
        .set_key(Kv::new(keys[4].clone(), "{}"))
        .await
        .expect("set fifth");
    assert!(store.batch_key_exist(&keys).await.expect("batch exists"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_reads_load_once() {
    let cache = QueryCache::in_memory(CacheConfig::default())
        .await
        .expect("cache");
    let loads = AtomicUsize::new(0);
    let gate = Notify::new();
    let args = [json!("pending")];
    let query = Query::new("orders", "SELECT * FROM orders WHERE status = ?", &args);

    let readers = (0..12).map(|_| {
        cache.fetch_search(&query, || async {
            loads.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            Ok::<_, CacheError>(Some(vec![Order {
                id: 1,
                total_cents: 500,
            }]))
        })
    });
    let release = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_one();
    };

    let (results, ()) = tokio::join!(join_all(readers), release);

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    let mut coalesced = 0;
    for result in results {
        let fetched = result.expect("fetch");
        if fetched.hit() == Some(HitKind::Coalesced) {
            coalesced += 1;
        }
        assert_eq!(fetched.value.expect("row").len(), 1);
    }
    assert_eq!(coalesced, 11);
    assert_eq!(cache.stats().hit_count_of(HitKind::Coalesced), 11);
    assert_eq!(cache.stats().miss_count(), 1);
}

#[tokio::test]
async fn write_during_load_does_not_leave_the_old_value_cached() {
    let cache = QueryCache::in_memory(CacheConfig::default())
        .await
        .expect("cache");
    let args = [json!(1)];
    let query = Query::new("users", "SELECT email FROM users WHERE id = ?", &args);
    let started = Notify::new();
    let gate = Notify::new();

    let reader = cache.fetch_search(&query, || async {
        started.notify_one();
        gate.notified().await;
        Ok::<_, CacheError>(Some("old".to_string()))
    });
    let writer = async {
        started.notified().await;
        cache
            .after_write(WriteKind::Update, "users", &["1".to_string()])
            .await
            .expect("invalidate");
        gate.notify_one();
    };

    let (read, ()) = tokio::join!(reader, writer);
    let read = read.expect("fetch");
    assert_eq!(read.source, Source::Store);
    assert_eq!(read.value.as_deref(), Some("old"));

    let fresh = cache
        .fetch_search(&query, || async {
            Ok::<_, CacheError>(Some("new".to_string()))
        })
        .await
        .expect("fetch");
    assert_eq!(fresh.source, Source::Store);
    assert_eq!(fresh.value.as_deref(), Some("new"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_keys_load_without_waiting_on_each_other() {
    let cache = QueryCache::in_memory(CacheConfig::default())
        .await
        .expect("cache");
    let loads = AtomicUsize::new(0);
    let barrier = tokio::sync::Barrier::new(6);
    let args: Vec<[Value; 1]> = (0..6).map(|id| [json!(id)]).collect();

    let readers = args.iter().enumerate().map(|(id, bound)| {
        let query = Query::new("users", "SELECT * FROM users WHERE id = ?", bound);
        let loads = &loads;
        let barrier = &barrier;
        let cache = &cache;
        async move {
            cache
                .fetch_primary(&query, &id.to_string(), || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    // Every load must be in progress at once for the barrier to open.
                    barrier.wait().await;
                    Ok::<_, CacheError>(Some(user(id as u64)))
                })
                .await
        }
    });

    let results = tokio::time::timeout(Duration::from_secs(5), join_all(readers))
        .await
        .expect("loads ran concurrently");

    assert_eq!(loads.load(Ordering::SeqCst), 6);
    for (id, result) in results.into_iter().enumerate() {
        let fetched = result.expect("fetch");
        assert_eq!(fetched.source, Source::Store);
        assert_eq!(fetched.value, Some(user(id as u64)));
    }
}

#[tokio::test]
async fn overrides_take_precedence_over_table_lists() {
    let config = CacheConfig::default()
        .with_tables(["users"])
        .with_disabled_tables(["sessions"]);
    let cache = QueryCache::in_memory(config).await.expect("cache");

    let denied = Query::new("sessions", "SELECT * FROM sessions", &[]);
    let unlisted = Query::new("orders", "SELECT * FROM orders", &[]);
    let allowed = Query::new("users", "SELECT * FROM users", &[]);

    assert!(!cache.should_cache(&denied));
    assert!(cache.should_cache(&denied.use_cache()));
    assert!(!cache.should_cache(&unlisted));
    assert!(cache.should_cache(&allowed));
    assert!(!cache.should_cache(&allowed.disable_cache()));

    let loads = AtomicUsize::new(0);
    for _ in 0..2 {
        cache
            .fetch_search(&denied, || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(Some(1))
            })
            .await
            .expect("fetch");
    }
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().hit_count(), 0);
}

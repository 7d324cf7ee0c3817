//! Per-key request coalescing.
//!
//! The first caller for a key becomes the leader and runs the load; callers
//! arriving while it is in flight subscribe to the leader's outcome instead of
//! loading again. The registry is a sharded map and no shard guard is held
//! across an await, so unrelated keys never wait on each other.

use std::future::Future;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use super::error::CacheError;

type Outcome<T> = Option<Result<T, CacheError>>;

/// How a caller took part in a flight.
#[derive(Debug, Clone, PartialEq)]
pub enum Flight<T> {
    /// This caller ran the load.
    Led(T),
    /// This caller received the result of another caller's load.
    Joined(T),
}

impl<T> Flight<T> {
    pub fn is_joined(&self) -> bool {
        matches!(self, Flight::Joined(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Flight::Led(value) | Flight::Joined(value) => value,
        }
    }
}

/// Registry of in-flight loads keyed by cache key.
pub struct SingleFlight<T> {
    calls: DashMap<String, watch::Receiver<Outcome<T>>>,
}

enum Role<T> {
    Leader(watch::Sender<Outcome<T>>),
    Follower(watch::Receiver<Outcome<T>>),
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Run `load` for `key` unless a load for it is already in flight, in
    /// which case wait for that one and share its outcome.
    pub async fn run<F, Fut>(&self, key: &str, load: F) -> Result<Flight<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let role = match self.calls.entry(key.to_owned()) {
            Entry::Occupied(occupied) => Role::Follower(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx);
                Role::Leader(tx)
            }
        };

        match role {
            Role::Leader(tx) => {
                let _release = Release {
                    calls: &self.calls,
                    key,
                };
                let outcome = load().await;
                tx.send_replace(Some(outcome.clone()));
                outcome.map(Flight::Led)
            }
            Role::Follower(mut rx) => {
                let shared = rx
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| CacheError::abandoned(key))?;
                match shared.as_ref() {
                    Some(Ok(value)) => Ok(Flight::Joined(value.clone())),
                    Some(Err(error)) => Err(error.clone()),
                    None => Err(CacheError::abandoned(key)),
                }
            }
        }
    }

    /// Number of keys with a load currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the leader's registration on completion, panic, or cancellation.
struct Release<'a, T> {
    calls: &'a DashMap<String, watch::Receiver<Outcome<T>>>,
    key: &'a str,
}

impl<T> Drop for Release<'_, T> {
    fn drop(&mut self) {
        self.calls.remove(self.key);
    }
}

//! Derived-list cache.
//!
//! Two keys matter to the helpdesk: the list of every ticket and the list of
//! tickets per owner. Both are read through [`TicketCache::get_or_compute`]
//! and evicted after every committed mutation of a ticket or one of its replies.

#[cfg(feature = "cache")]
pub mod redis_store;

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::shared::models::ActorId;

#[cfg(feature = "cache")]
pub use redis_store::RedisCacheStore;

pub const ALL_TICKETS_KEY: &str = "tickets:all";

pub fn owner_tickets_key(owner_id: ActorId) -> String {
    format!("tickets:user:{}", owner_id)
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Current generation of `key`. Starts at 0 and advances on every `forget`.
    async fn generation(&self, key: &str) -> Result<u64, CacheError>;

    /// Stores `value` only if `key` is still at `generation`, as one atomic step.
    /// Returns whether the value was written.
    async fn put_if_generation(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool, CacheError>;

    /// Advances the generation of `key` and removes its entry. Returns whether a
    /// live entry was removed. Forgetting a missing key is not an error.
    async fn forget(&self, key: &str) -> Result<bool, CacheError>;
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    generations: HashMap<String, u64>,
}

impl MemoryState {
    fn insert(&mut self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

/// Process-local store, used when no Redis URL is configured.
#[derive(Default)]
pub struct InMemoryCacheStore {
    state: RwLock<MemoryState>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.state.write().await.insert(key, value, ttl);
        Ok(())
    }

    async fn generation(&self, key: &str) -> Result<u64, CacheError> {
        Ok(self
            .state
            .read()
            .await
            .generations
            .get(key)
            .copied()
            .unwrap_or(0))
    }

    async fn put_if_generation(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool, CacheError> {
        let mut state = self.state.write().await;
        if state.generations.get(key).copied().unwrap_or(0) != generation {
            return Ok(false);
        }
        state.insert(key, value, ttl);
        Ok(true)
    }

    async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        let mut state = self.state.write().await;
        *state.generations.entry(key.to_string()).or_insert(0) += 1;
        Ok(state
            .entries
            .remove(key)
            .is_some_and(|e| e.expires_at > Instant::now()))
    }
}

/// Cache service injected into the ticket service and its invalidation hook.
#[derive(Clone)]
pub struct TicketCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl TicketCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryCacheStore::new()), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Returns the cached value under `key`, or runs `compute` and stores its result.
    ///
    /// Cache failures never fail the read: a broken backend or an undecodable
    /// entry falls back to `compute`. Errors from `compute` are returned as-is
    /// and nothing is stored. A result is only written back if `key` was not
    /// invalidated while `compute` ran, so a list read before a commit never
    /// replaces the eviction that commit caused.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    debug!("Cache hit for {}", key);
                    return Ok(value);
                }
                Err(e) => warn!("Discarding undecodable cache entry {}: {}", key, e),
            },
            Ok(None) => debug!("Cache miss for {}", key),
            Err(e) => warn!("Cache read failed for {}: {}", key, e),
        }

        let generation = match self.store.generation(key).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                warn!("Cache generation read failed for {}: {}", key, e);
                None
            }
        };

        let value = compute().await?;

        let Some(generation) = generation else {
            return Ok(value);
        };
        match serde_json::to_string(&value) {
            Ok(raw) => match self
                .store
                .put_if_generation(key, raw, self.ttl, generation)
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!("Skipping write of {}, invalidated during compute", key),
                Err(e) => warn!("Cache write failed for {}: {}", key, e),
            },
            Err(e) => warn!("Failed to serialize cache entry {}: {}", key, e),
        }

        Ok(value)
    }

    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let removed = self.store.forget(key).await?;
        debug!("Cache key {} invalidated (present: {})", key, removed);
        Ok(())
    }

    /// Evicts the global list and the list of `owner_id`.
    pub async fn invalidate_ticket_lists(&self, owner_id: ActorId) -> Result<(), CacheError> {
        let owner_key = owner_tickets_key(owner_id);
        let mut first_error = None;
        for key in [ALL_TICKETS_KEY, owner_key.as_str()] {
            if let Err(e) = self.invalidate(key).await {
                warn!("Failed to invalidate {}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn put(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn generation(&self, _key: &str) -> Result<u64, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn put_if_generation(
            &self,
            _key: &str,
            _value: String,
            _ttl: Duration,
            _generation: u64,
        ) -> Result<bool, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn forget(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    #[test]
    fn test_key_format() {
        let owner = Uuid::nil();
        assert_eq!(
            owner_tickets_key(owner),
            "tickets:user:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(ALL_TICKETS_KEY, "tickets:all");
    }

    #[tokio::test]
    async fn test_get_or_compute_caches_value() {
        let cache = TicketCache::in_memory(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let value: Result<Vec<u32>, CacheError> = cache
                .get_or_compute("numbers", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await;
            assert_eq!(value.unwrap(), vec![1, 2, 3]);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        cache.invalidate("numbers").await.unwrap();
        let _: Result<Vec<u32>, CacheError> = cache
            .get_or_compute("numbers", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            })
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_compute_error_is_not_cached() {
        let cache = TicketCache::in_memory(Duration::from_secs(60));
        let failed: Result<u32, String> = cache
            .get_or_compute("flaky", || async { Err("boom".to_string()) })
            .await;
        assert!(failed.is_err());
        assert!(cache.store().get("flaky").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidating_absent_key_is_noop() {
        let cache = TicketCache::in_memory(Duration::from_secs(60));
        assert!(cache.invalidate("tickets:all").await.is_ok());
        assert!(cache.invalidate("tickets:all").await.is_ok());
        assert!(cache.invalidate_ticket_lists(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalidate_ticket_lists_evicts_both_keys() {
        let store = Arc::new(InMemoryCacheStore::new());
        let cache = TicketCache::new(store.clone(), Duration::from_secs(60));
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let ttl = Duration::from_secs(60);

        store.put(ALL_TICKETS_KEY, "[]".into(), ttl).await.unwrap();
        store.put(&owner_tickets_key(owner), "[]".into(), ttl).await.unwrap();
        store.put(&owner_tickets_key(other), "[]".into(), ttl).await.unwrap();

        cache.invalidate_ticket_lists(owner).await.unwrap();

        assert!(store.get(ALL_TICKETS_KEY).await.unwrap().is_none());
        assert!(store.get(&owner_tickets_key(owner)).await.unwrap().is_none());
        assert!(store.get(&owner_tickets_key(other)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let store = InMemoryCacheStore::new();
        store
            .put("short", "1".into(), Duration::from_millis(0))
            .await
            .unwrap();
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidation_during_compute_discards_result() {
        let cache = TicketCache::in_memory(Duration::from_secs(60));
        let writer = cache.clone();

        let stale: Result<Vec<u32>, CacheError> = cache
            .get_or_compute("tickets:all", || async move {
                // a mutation commits and evicts while the list is being read
                writer.invalidate("tickets:all").await?;
                Ok(vec![])
            })
            .await;
        assert!(stale.unwrap().is_empty());
        assert!(cache.store().get("tickets:all").await.unwrap().is_none());

        let fresh: Result<Vec<u32>, CacheError> = cache
            .get_or_compute("tickets:all", || async { Ok(vec![1]) })
            .await;
        assert_eq!(fresh.unwrap(), vec![1]);
        assert_eq!(
            cache.store().get("tickets:all").await.unwrap().as_deref(),
            Some("[1]")
        );
    }

    #[tokio::test]
    async fn test_put_if_generation_rejects_outdated_writer() {
        let store = InMemoryCacheStore::new();
        let ttl = Duration::from_secs(60);
        let seen = store.generation("k").await.unwrap();
        assert_eq!(seen, 0);

        store.forget("k").await.unwrap();
        assert_eq!(store.generation("k").await.unwrap(), 1);
        assert!(!store.put_if_generation("k", "old".into(), ttl, seen).await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());

        assert!(store.put_if_generation("k", "new".into(), ttl, 1).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_broken_backend_falls_back_to_compute() {
        let cache = TicketCache::new(Arc::new(BrokenStore), Duration::from_secs(60));
        let value: Result<u32, CacheError> = cache.get_or_compute("k", || async { Ok(7) }).await;
        assert_eq!(value.unwrap(), 7);
        assert!(cache.invalidate_ticket_lists(Uuid::new_v4()).await.is_err());
    }
}

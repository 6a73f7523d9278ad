use super::cache::QueryCache;
use super::cached_data::CacheEntry;
use super::config::DEFAULT_CACHE_CAPACITY;
use super::key::QueryKey;
use super::policy::InvalidationPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

type StoredValue = Arc<dyn Any + Send + Sync>;

/// Type-agnostic in-memory store shared by controllers of any response type.
///
/// Values are kept behind `dyn Any`; reading a key with a different type
/// than it was saved with is a miss. When full, the oldest-stored entry is
/// evicted.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<QueryKey, CacheEntry<StoredValue>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn remove(&self, key: &QueryKey) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Timestamp of the entry at `key`, if any
    pub async fn stored_at(&self, key: &QueryKey) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(key).map(|entry| entry.stored_at)
    }

    fn evict_oldest(entries: &mut HashMap<QueryKey, CacheEntry<StoredValue>>) {
        let oldest_key = entries
            .iter()
            .min_by_key(|(_, entry)| entry.stored_at)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest_key {
            debug!("🧹 Cache EVICT: {}", key);
            entries.remove(&key);
        }
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.entries.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }
}

#[async_trait]
impl<V> QueryCache<V> for MemoryCache
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &QueryKey) -> Option<V> {
        let entries = self.entries.read().await;
        let value = entries
            .get(key)
            .and_then(|entry| entry.value.downcast_ref::<V>().cloned());
        drop(entries);

        if value.is_some() {
            debug!("🎯 Cache HIT: {}", key);
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!("❌ Cache MISS: {}", key);
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    async fn save(&self, value: V, key: &QueryKey, timestamp: DateTime<Utc>) {
        info!("💾 Cache STORE: {}", key);
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(key) {
            entry.update(Arc::new(value), timestamp);
            return;
        }

        if entries.len() >= self.capacity {
            Self::evict_oldest(&mut entries);
        }
        entries.insert(key.clone(), CacheEntry::new(Arc::new(value), timestamp));
    }

    async fn is_valid(&self, key: &QueryKey, now: DateTime<Utc>, policy: &InvalidationPolicy) -> bool {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_valid(now, policy) => true,
            Some(_) => {
                debug!("🔄 Cache STALE: {}", key);
                false
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub capacity: usize,
}

impl CacheStats {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::cache::get_valid;

    #[tokio::test]
    async fn test_cache_basic_operations() {
        let cache = MemoryCache::new();
        let key = QueryKey::new("users");

        // Test empty cache
        assert!(QueryCache::<String>::get(&cache, &key).await.is_none());

        cache.save("alice".to_string(), &key, Utc::now()).await;
        let retrieved: Option<String> = cache.get(&key).await;
        assert_eq!(retrieved.as_deref(), Some("alice"));

        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let cache = MemoryCache::new();
        let key = QueryKey::new("count");
        cache.save(7_u32, &key, Utc::now()).await;

        let as_string: Option<String> = cache.get(&key).await;
        assert!(as_string.is_none());
        let as_u32: Option<u32> = cache.get(&key).await;
        assert_eq!(as_u32, Some(7));
    }

    #[tokio::test]
    async fn test_validity_uses_stored_timestamp() {
        let cache = MemoryCache::new();
        let key = QueryKey::new("K");
        let now = Utc::now();
        let policy = InvalidationPolicy::ttl_secs(60);

        cache
            .save("old".to_string(), &key, now - chrono::Duration::seconds(120))
            .await;
        assert!(!QueryCache::<String>::is_valid(&cache, &key, now, &policy).await);
        assert!(get_valid::<String>(&cache, &key, now, &policy).await.is_none());

        cache.save("new".to_string(), &key, now).await;
        assert_eq!(
            get_valid::<String>(&cache, &key, now, &policy).await.as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = MemoryCache::with_capacity(2);
        let now = Utc::now();

        cache.save(1_i32, &QueryKey::new("a"), now - chrono::Duration::seconds(30)).await;
        cache.save(2_i32, &QueryKey::new("b"), now - chrono::Duration::seconds(10)).await;
        cache.save(3_i32, &QueryKey::new("c"), now).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.stored_at(&QueryKey::new("a")).await.is_none());
        assert!(cache.stored_at(&QueryKey::new("c")).await.is_some());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = MemoryCache::new();
        let key = QueryKey::new("x");
        cache.save(1_i64, &key, Utc::now()).await;

        assert!(cache.remove(&key).await);
        assert!(!cache.remove(&key).await);

        cache.save(1_i64, &key, Utc::now()).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}

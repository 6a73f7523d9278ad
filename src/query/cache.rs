use super::key::QueryKey;
use super::policy::InvalidationPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage consulted and written by the controllers.
///
/// Implementations are infallible from the controller's point of view and
/// must make a `save` visible to a following `get` or `is_valid` on the same
/// key. `save` establishes the timestamp later checked by `is_valid`.
#[async_trait]
pub trait QueryCache<V>: Send + Sync {
    async fn get(&self, key: &QueryKey) -> Option<V>;

    async fn save(&self, value: V, key: &QueryKey, timestamp: DateTime<Utc>);

    async fn is_valid(&self, key: &QueryKey, now: DateTime<Utc>, policy: &InvalidationPolicy) -> bool;
}

/// Reads `key` only if its entry passes `policy` at `now`
pub async fn get_valid<V>(
    cache: &dyn QueryCache<V>,
    key: &QueryKey,
    now: DateTime<Utc>,
    policy: &InvalidationPolicy,
) -> Option<V> {
    if cache.is_valid(key, now, policy).await {
        cache.get(key).await
    } else {
        None
    }
}

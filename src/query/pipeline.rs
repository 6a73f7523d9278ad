/**
 * Cache-policy fetch algorithm shared by the query controllers
 */
use super::cache::{QueryCache, get_valid};
use super::config::CacheConfig;
use super::key::QueryKey;
use super::policy::UsagePolicy;
use super::state::State;
use crate::error::Result;
use chrono::Utc;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How one run of the algorithm ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Served a valid entry without fetching
    FromCache,
    Fetched,
    /// The fetch failed and a valid entry was served instead
    FellBackToCache,
    Failed,
}

impl FetchOutcome {
    /// Whether the fetch function was called and failed
    #[must_use]
    pub const fn fetch_failed(self) -> bool {
        matches!(self, Self::FellBackToCache | Self::Failed)
    }
}

/// Runs the cache/fetch algorithm for `key`, reporting every state through `emit`.
///
/// `fetch` is only called when the usage policy requires a live fetch.
pub async fn perform<T, F, Fut>(
    cache: &dyn QueryCache<T>,
    config: &CacheConfig,
    key: &QueryKey,
    fetch: F,
    mut emit: impl FnMut(State<T>) + Send,
) -> FetchOutcome
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    let validity = &config.invalidation_policy;

    match config.usage_policy {
        UsagePolicy::UseInsteadOfFetching => {
            if let Some(cached) = get_valid(cache, key, Utc::now(), validity).await {
                debug!("⚡ Using cached data for {}, skipping fetch", key);
                emit(State::Succeeded(cached));
                return FetchOutcome::FromCache;
            }
        }
        UsagePolicy::UseAndThenFetch => {
            if let Some(cached) = get_valid(cache, key, Utc::now(), validity).await {
                debug!("⚡ Using cached data for {} while fetching", key);
                emit(State::Succeeded(cached));
            }
        }
        UsagePolicy::UseIfFetchFails | UsagePolicy::AlwaysFetch => {}
    }

    let start = Instant::now();
    info!("🔄 FETCH START: {}", key);

    match fetch().await {
        Ok(response) => {
            info!("✅ FETCH SUCCESS: {} ({:.2}s)", key, start.elapsed().as_secs_f64());
            emit(State::Succeeded(response.clone()));
            cache.save(response, key, Utc::now()).await;
            FetchOutcome::Fetched
        }
        Err(error) => {
            if config.usage_policy == UsagePolicy::UseIfFetchFails {
                if let Some(cached) = get_valid(cache, key, Utc::now(), validity).await {
                    warn!("❌ FETCH FAILED: {} - {}; serving cached data", key, error);
                    emit(State::Succeeded(cached));
                    return FetchOutcome::FellBackToCache;
                }
            }
            warn!("❌ FETCH FAILED: {} ({:.2}s) - {}", key, start.elapsed().as_secs_f64(), error);
            emit(State::failed(error));
            FetchOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::query::memory_cache::MemoryCache;
    use crate::query::policy::InvalidationPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn run(
        cache: &MemoryCache,
        usage: UsagePolicy,
        result: Result<String>,
        calls: &AtomicUsize,
    ) -> (FetchOutcome, Vec<State<String>>) {
        let config = CacheConfig::new(usage, InvalidationPolicy::ttl_secs(60));
        let cache: &dyn QueryCache<String> = cache;
        let mut emitted = Vec::new();
        let outcome = perform(
            cache,
            &config,
            &QueryKey::new("K"),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { result }
            },
            |state| emitted.push(state),
        )
        .await;
        (outcome, emitted)
    }

    async fn seeded_cache() -> MemoryCache {
        let cache = MemoryCache::new();
        cache
            .save(
                "cached-v1".to_string(),
                &QueryKey::new("K"),
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await;
        cache
    }

    #[tokio::test]
    async fn test_use_instead_of_fetching_skips_fetch() {
        let cache = seeded_cache().await;
        let calls = AtomicUsize::new(0);

        let (outcome, emitted) =
            run(&cache, UsagePolicy::UseInsteadOfFetching, Ok("live".to_string()), &calls).await;

        assert_eq!(outcome, FetchOutcome::FromCache);
        assert_eq!(emitted, vec![State::Succeeded("cached-v1".to_string())]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_use_and_then_fetch_emits_both() {
        let cache = seeded_cache().await;
        let calls = AtomicUsize::new(0);

        let (outcome, emitted) =
            run(&cache, UsagePolicy::UseAndThenFetch, Ok("live".to_string()), &calls).await;

        assert_eq!(outcome, FetchOutcome::Fetched);
        assert_eq!(
            emitted,
            vec![
                State::Succeeded("cached-v1".to_string()),
                State::Succeeded("live".to_string())
            ]
        );
        let stored: Option<String> = cache.get(&QueryKey::new("K")).await;
        assert_eq!(stored.as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn test_always_fetch_ignores_cache_on_failure() {
        let cache = seeded_cache().await;
        let calls = AtomicUsize::new(0);

        let (outcome, emitted) =
            run(&cache, UsagePolicy::AlwaysFetch, Err(Error::fetch("down")), &calls).await;

        assert_eq!(outcome, FetchOutcome::Failed);
        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].error().is_some());
        assert!(outcome.fetch_failed());
    }

    #[tokio::test]
    async fn test_fallback_to_cache() {
        let cache = seeded_cache().await;
        let calls = AtomicUsize::new(0);

        let (outcome, emitted) =
            run(&cache, UsagePolicy::UseIfFetchFails, Err(Error::fetch("down")), &calls).await;

        assert_eq!(outcome, FetchOutcome::FellBackToCache);
        assert_eq!(emitted, vec![State::Succeeded("cached-v1".to_string())]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

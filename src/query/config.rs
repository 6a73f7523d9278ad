/**
 * Configuration constants and per-controller cache configuration
 */
use super::policy::{InvalidationPolicy, UsagePolicy};

/// Default freshness window for cache entries in seconds
pub const DEFAULT_TTL_SECS: u64 = 300; // 5 minutes

/// Buffered transitions per state observer before it starts lagging
pub const STATE_CHANNEL_CAPACITY: usize = 64;

/// Default maximum number of entries kept by the in-memory cache
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Cache usage and validity rules for one controller
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub usage_policy: UsagePolicy,
    pub invalidation_policy: InvalidationPolicy,
}

impl CacheConfig {
    #[must_use]
    pub const fn new(usage_policy: UsagePolicy, invalidation_policy: InvalidationPolicy) -> Self {
        Self {
            usage_policy,
            invalidation_policy,
        }
    }

    /// Same validity rule, different usage policy
    #[must_use]
    pub fn with_usage(mut self, usage_policy: UsagePolicy) -> Self {
        self.usage_policy = usage_policy;
        self
    }

    #[must_use]
    pub fn with_invalidation(mut self, invalidation_policy: InvalidationPolicy) -> Self {
        self.invalidation_policy = invalidation_policy;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            usage_policy: UsagePolicy::default(),
            invalidation_policy: InvalidationPolicy::ttl_secs(DEFAULT_TTL_SECS),
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(DEFAULT_TTL_SECS > 0, "DEFAULT_TTL_SECS must be greater than 0");
    assert!(STATE_CHANNEL_CAPACITY > 0, "STATE_CHANNEL_CAPACITY must be greater than 0");
    assert!(DEFAULT_CACHE_CAPACITY > 0, "DEFAULT_CACHE_CAPACITY must be greater than 0");
};

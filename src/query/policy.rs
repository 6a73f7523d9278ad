use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a cache hit interacts with a live fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsagePolicy {
    /// A valid entry is served and no fetch is made
    UseInsteadOfFetching,
    /// A valid entry is served first, then a fetch replaces it
    UseAndThenFetch,
    /// Fetch first, fall back to a valid entry if the fetch fails
    #[default]
    UseIfFetchFails,
    /// The cache is written but never read
    AlwaysFetch,
}

type ValidityFn = dyn Fn(DateTime<Utc>, DateTime<Utc>) -> bool + Send + Sync;

/// Decides whether a cache entry stored at some time is still fresh
#[derive(Clone)]
pub enum InvalidationPolicy {
    /// Entries never go stale
    NeverExpires,
    /// Entries older than the duration are stale
    Ttl(Duration),
    /// Arbitrary predicate over `(now, stored_at)`
    Custom(Arc<ValidityFn>),
}

impl InvalidationPolicy {
    #[must_use]
    pub const fn ttl_secs(secs: u64) -> Self {
        Self::Ttl(Duration::from_secs(secs))
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>, stored_at: DateTime<Utc>) -> bool {
        match self {
            Self::NeverExpires => true,
            // An entry stamped in the future (clock skew) counts as fresh
            Self::Ttl(ttl) => now
                .signed_duration_since(stored_at)
                .to_std()
                .ok()
                .is_none_or(|age| age <= *ttl),
            Self::Custom(predicate) => predicate(now, stored_at),
        }
    }
}

impl fmt::Debug for InvalidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverExpires => write!(f, "NeverExpires"),
            Self::Ttl(ttl) => write!(f, "Ttl({}s)", ttl.as_secs()),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_validity() {
        let policy = InvalidationPolicy::ttl_secs(60);
        let now = Utc::now();

        assert!(policy.is_valid(now, now - chrono::Duration::seconds(1)));
        assert!(!policy.is_valid(now, now - chrono::Duration::seconds(61)));
        assert!(policy.is_valid(now, now + chrono::Duration::seconds(5)));
    }

    #[test]
    fn test_custom_policy() {
        let policy = InvalidationPolicy::custom(|_, _| false);
        let now = Utc::now();
        assert!(!policy.is_valid(now, now));
        assert!(InvalidationPolicy::NeverExpires.is_valid(now, now - chrono::Duration::days(365)));
    }
}

use super::policy::InvalidationPolicy;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A stored value and the moment it was written
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub const fn new(value: V, stored_at: DateTime<Utc>) -> Self {
        Self { value, stored_at }
    }

    pub fn is_valid(&self, now: DateTime<Utc>, policy: &InvalidationPolicy) -> bool {
        policy.is_valid(now, self.stored_at)
    }

    /// Zero when the entry was stamped in the future
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn update(&mut self, value: V, stored_at: DateTime<Utc>) {
        self.value = value;
        self.stored_at = stored_at;
    }
}

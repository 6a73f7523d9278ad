use super::key::QueryKey;
use std::sync::Arc;
use std::time::Duration;

/// Derives the effective cache key for a request from the controller's base key
pub type KeyAdapter<R> = Arc<dyn Fn(&QueryKey, &R) -> QueryKey + Send + Sync>;

/// The base key, whatever the request
#[must_use]
pub fn identity_adapter<R: 'static>() -> KeyAdapter<R> {
    Arc::new(|key: &QueryKey, _: &R| key.clone())
}

/// What a controller does right after construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartBehavior<R> {
    /// Wait for the first `refetch`; valid cached data may still be shown
    StartWhenRequested,
    /// Spawn `refetch(request)` straight away
    StartImmediately(R),
}

impl<R> Default for StartBehavior<R> {
    fn default() -> Self {
        Self::StartWhenRequested
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollingBehavior {
    #[default]
    NoPolling,
    /// Re-run the last request this often after each completed fetch
    PollEvery(Duration),
}

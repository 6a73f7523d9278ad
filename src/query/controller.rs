use super::behavior::{KeyAdapter, PollingBehavior, StartBehavior, identity_adapter};
use super::cache::{QueryCache, get_valid};
use super::config::CacheConfig;
use super::dispatch::StateCell;
use super::fetcher::Fetcher;
use super::invalidation::{InvalidationBus, InvalidationPayload, Subscription};
use super::key::QueryKey;
use super::pipeline::{self, FetchOutcome};
use super::policy::UsagePolicy;
use super::registry::{ControllerHandle, ControllerKind, Registry};
use super::state::{State, StateKind};
use super::wiring::{Overrides, Wiring};
use crate::environment::QueryEnvironment;
use chrono::Utc;
use futures::Stream;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Fetches a single value for a request, reconciled against a cache.
///
/// Cheap to clone; the controller is torn down when the last handle drops,
/// which stops polling, leaves the invalidation bus and unregisters it.
pub struct Query<R, T> {
    inner: Arc<QueryInner<R, T>>,
}

impl<R, T> Clone for Query<R, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct QueryInner<R, T> {
    key: QueryKey,
    key_adapter: KeyAdapter<R>,
    fetcher: Arc<dyn Fetcher<R, T>>,
    cache: Arc<dyn QueryCache<T>>,
    cache_config: CacheConfig,
    polling: PollingBehavior,
    state: StateCell<T>,
    last_request: Mutex<Option<R>>,
    poll: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    subscription_id: Uuid,
    bus: Arc<InvalidationBus>,
    registry: Arc<Registry>,
    self_ref: Weak<Self>,
}

impl<R, T> Query<R, T>
where
    R: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn builder(key: impl Into<QueryKey>, fetcher: impl Fetcher<R, T> + 'static) -> QueryBuilder<R, T> {
        QueryBuilder::new(key.into(), Arc::new(fetcher))
    }

    /// Fetches `request` under the configured cache policy.
    ///
    /// Overlapping calls are not serialized: whichever fetch completes last
    /// determines the final state.
    pub async fn refetch(&self, request: R) {
        self.inner.refetch(request).await;
    }

    #[must_use]
    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    #[must_use]
    pub fn state(&self) -> State<T> {
        self.inner.state.get()
    }

    /// The current state followed by every later transition
    pub fn subscribe(&self) -> impl Stream<Item = State<T>> + Send + 'static {
        self.inner.state.subscribe()
    }

    /// Transitions from now on, without the current state
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<State<T>> {
        self.inner.state.updates()
    }

    #[must_use]
    pub fn last_request(&self) -> Option<R> {
        self.inner.last_request()
    }

    /// Whether a poll timer is currently armed
    #[must_use]
    pub fn is_polling(&self) -> bool {
        lock(&self.inner.poll)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl<R, T> QueryInner<R, T>
where
    R: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn last_request(&self) -> Option<R> {
        lock(&self.last_request).clone()
    }

    async fn refetch(&self, request: R) {
        self.cancel_poll();
        if self.cache_config.usage_policy == UsagePolicy::UseIfFetchFails {
            self.state.transition(State::Loading);
        }
        *lock(&self.last_request) = Some(request.clone());

        self.perform_fetch(request.clone()).await;
        self.arm_poll(request);
    }

    async fn perform_fetch(&self, request: R) -> FetchOutcome {
        let key = (self.key_adapter)(&self.key, &request);
        let fetcher = &self.fetcher;

        let outcome = pipeline::perform(
            self.cache.as_ref(),
            &self.cache_config,
            &key,
            || fetcher.fetch(request),
            |state| self.state.transition(state),
        )
        .await;

        if outcome.fetch_failed() {
            self.cancel_poll();
        }
        outcome
    }

    fn cancel_poll(&self) {
        if let Some(token) = lock(&self.poll).take() {
            debug!("⏹️  POLL CANCELLED: {}", self.key);
            token.cancel();
        }
    }

    fn arm_poll(&self, request: R) {
        let PollingBehavior::PollEvery(interval) = self.polling else {
            return;
        };

        let token = self.shutdown.child_token();
        if let Some(previous) = lock(&self.poll).replace(token.clone()) {
            previous.cancel();
        }
        info!("⏱️  POLL ARMED: {} every {}ms", self.key, interval.as_millis());

        let weak = self.self_ref.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                debug!("⏱️  POLL TICK: {}", inner.key);
                let outcome = inner.perform_fetch(request.clone()).await;
                drop(inner);

                if outcome.fetch_failed() || token.is_cancelled() {
                    break;
                }
            }
        });
    }

    fn spawn_refetch(&self, request: R) {
        let Some(inner) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            inner.refetch(request).await;
        });
    }

    fn handle_invalidation(&self, payload: InvalidationPayload<R>) {
        match payload {
            InvalidationPayload::LastData => match self.last_request() {
                Some(request) => self.spawn_refetch(request),
                None => debug!("🔕 Nothing to replay for {}", self.key),
            },
            InvalidationPayload::NewData(request) => self.spawn_refetch(request),
        }
    }

    fn spawn_listener(weak: Weak<Self>, mut subscription: Subscription<R>, shutdown: CancellationToken) {
        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    () = shutdown.cancelled() => break,
                    payload = subscription.recv() => payload,
                };
                let (Some(payload), Some(inner)) = (payload, weak.upgrade()) else {
                    break;
                };
                inner.handle_invalidation(payload);
            }
        });
    }
}

impl<R, T> ControllerHandle for QueryInner<R, T>
where
    R: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn kind(&self) -> ControllerKind {
        ControllerKind::Query
    }

    fn state_kind(&self) -> StateKind {
        self.state.get().kind()
    }

    fn refetch_last(&self) {
        self.handle_invalidation(InvalidationPayload::LastData);
    }
}

impl<R, T> Drop for QueryInner<R, T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.bus.unsubscribe(self.subscription_id);
        self.registry.unregister(&self.key);
    }
}

fn lock<V>(mutex: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configures and builds a [`Query`]
pub struct QueryBuilder<R, T> {
    key: QueryKey,
    fetcher: Arc<dyn Fetcher<R, T>>,
    key_adapter: KeyAdapter<R>,
    start: StartBehavior<R>,
    polling: PollingBehavior,
    overrides: Overrides<T>,
}

impl<R, T> QueryBuilder<R, T>
where
    R: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn new(key: QueryKey, fetcher: Arc<dyn Fetcher<R, T>>) -> Self {
        Self {
            key,
            fetcher,
            key_adapter: identity_adapter(),
            start: StartBehavior::StartWhenRequested,
            polling: PollingBehavior::NoPolling,
            overrides: Overrides::default(),
        }
    }

    #[must_use]
    pub fn key_adapter<F>(mut self, adapter: F) -> Self
    where
        F: Fn(&QueryKey, &R) -> QueryKey + Send + Sync + 'static,
    {
        self.key_adapter = Arc::new(adapter);
        self
    }

    #[must_use]
    pub fn start(mut self, start: StartBehavior<R>) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub const fn polling(mut self, polling: PollingBehavior) -> Self {
        self.polling = polling;
        self
    }

    /// Cache, bus, registry and cache config not set individually come from here
    #[must_use]
    pub fn environment(mut self, environment: &QueryEnvironment) -> Self {
        self.overrides.environment = Some(environment.clone());
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn QueryCache<T>>) -> Self {
        self.overrides.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.overrides.cache_config = Some(cache_config);
        self
    }

    #[must_use]
    pub fn bus(mut self, bus: Arc<InvalidationBus>) -> Self {
        self.overrides.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.overrides.registry = Some(registry);
        self
    }

    /// Hydrates from cache if the start behavior allows it, subscribes to
    /// invalidations for the key, registers the controller and applies the
    /// start behavior.
    pub async fn build(self) -> Query<R, T> {
        let Wiring {
            cache,
            cache_config,
            bus,
            registry,
        } = self.overrides.resolve();

        let hydrate = matches!(self.start, StartBehavior::StartWhenRequested)
            && matches!(
                cache_config.usage_policy,
                UsagePolicy::UseInsteadOfFetching | UsagePolicy::UseAndThenFetch
            );
        let initial = if hydrate {
            get_valid(cache.as_ref(), &self.key, Utc::now(), &cache_config.invalidation_policy)
                .await
                .map_or(State::Idle, State::Succeeded)
        } else {
            State::Idle
        };
        debug!("🚀 QUERY READY: {} ({:?})", self.key, initial.kind());

        let subscription = bus.listen::<R>(self.key.clone());
        let shutdown = CancellationToken::new();

        let inner = Arc::new_cyclic(|self_ref| QueryInner {
            key: self.key.clone(),
            key_adapter: self.key_adapter,
            fetcher: self.fetcher,
            cache,
            cache_config,
            polling: self.polling,
            state: StateCell::new(initial),
            last_request: Mutex::new(None),
            poll: Mutex::new(None),
            shutdown: shutdown.clone(),
            subscription_id: subscription.id(),
            bus,
            registry: registry.clone(),
            self_ref: self_ref.clone(),
        });

        QueryInner::spawn_listener(Arc::downgrade(&inner), subscription, shutdown);
        let handle: Weak<dyn ControllerHandle> = Arc::downgrade(&inner) as Weak<dyn ControllerHandle>;
        registry.register(self.key, handle);

        if let StartBehavior::StartImmediately(request) = self.start {
            inner.spawn_refetch(request);
        }

        Query { inner }
    }
}

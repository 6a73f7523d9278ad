use super::behavior::{KeyAdapter, StartBehavior, identity_adapter};
use super::cache::{QueryCache, get_valid};
use super::config::CacheConfig;
use super::dispatch::StateCell;
use super::fetcher::PageFetcher;
use super::invalidation::{InvalidationBus, InvalidationPayload, Subscription};
use super::key::QueryKey;
use super::page::PageIdentifier;
use super::pipeline;
use super::policy::UsagePolicy;
use super::registry::{ControllerHandle, ControllerKind, Registry};
use super::state::{State, StateKind};
use super::wiring::{Overrides, Wiring};
use crate::environment::QueryEnvironment;
use chrono::Utc;
use futures::Stream;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Fetches a result page by page and exposes the concatenation of every
/// page loaded so far.
///
/// The observed state is `Succeeded(all elements)` whenever the latest page
/// fetch succeeded; `page_state` shows the page-level state underneath.
pub struct PaginatedQuery<R, P, E> {
    inner: Arc<PaginatedInner<R, P, E>>,
}

impl<R, P, E> Clone for PaginatedQuery<R, P, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PaginatedInner<R, P, E> {
    key: QueryKey,
    key_adapter: KeyAdapter<R>,
    fetcher: Arc<dyn PageFetcher<R, P, E>>,
    cache: Arc<dyn QueryCache<Vec<E>>>,
    cache_config: CacheConfig,
    /// Guards the page state, accumulation and observed state as one unit
    dispatch: Mutex<()>,
    page_state: StateCell<Vec<E>>,
    state: StateCell<Vec<E>>,
    accumulated: watch::Sender<Vec<E>>,
    /// Bumped by every `refetch`
    generation: AtomicU64,
    page: Mutex<P>,
    last_request: Mutex<Option<R>>,
    shutdown: CancellationToken,
    subscription_id: Uuid,
    bus: Arc<InvalidationBus>,
    registry: Arc<Registry>,
    self_ref: Weak<Self>,
}

impl<R, P, E> PaginatedQuery<R, P, E>
where
    R: Clone + Send + Sync + 'static,
    P: PageIdentifier,
    E: Clone + Send + Sync + 'static,
{
    pub fn builder(
        key: impl Into<QueryKey>,
        fetcher: impl PageFetcher<R, P, E> + 'static,
    ) -> PaginatedQueryBuilder<R, P, E> {
        PaginatedQueryBuilder::new(key.into(), Arc::new(fetcher))
    }

    /// Starts over: clears the accumulation and fetches the first page
    pub async fn refetch(&self, request: R) {
        self.inner.refetch(request).await;
    }

    /// Fetches the page after the current one for the last request.
    /// Does nothing if no request was made yet.
    pub async fn fetch_next_page(&self) {
        self.inner.fetch_next_page().await;
    }

    #[must_use]
    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    #[must_use]
    pub fn state(&self) -> State<Vec<E>> {
        self.inner.state.get()
    }

    pub fn subscribe(&self) -> impl Stream<Item = State<Vec<E>>> + Send + 'static {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<State<Vec<E>>> {
        self.inner.state.updates()
    }

    /// State of the most recent page fetch, holding only that page
    #[must_use]
    pub fn page_state(&self) -> State<Vec<E>> {
        self.inner.page_state.get()
    }

    #[must_use]
    pub fn accumulated(&self) -> Vec<E> {
        self.inner.accumulated.borrow().clone()
    }

    #[must_use]
    pub fn watch_accumulated(&self) -> watch::Receiver<Vec<E>> {
        self.inner.accumulated.subscribe()
    }

    #[must_use]
    pub fn current_page(&self) -> P {
        lock(&self.inner.page).clone()
    }

    #[must_use]
    pub fn last_request(&self) -> Option<R> {
        lock(&self.inner.last_request).clone()
    }
}

impl<R, P, E> PaginatedInner<R, P, E>
where
    R: Clone + Send + Sync + 'static,
    P: PageIdentifier,
    E: Clone + Send + Sync + 'static,
{
    async fn refetch(&self, request: R) {
        let generation = {
            let _dispatch = lock(&self.dispatch);
            self.accumulated.send_replace(Vec::new());
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        *lock(&self.page) = P::first();

        if self.cache_config.usage_policy == UsagePolicy::UseIfFetchFails {
            self.apply(State::Loading, &mut None, generation);
        }
        *lock(&self.last_request) = Some(request.clone());

        self.fetch_page(request, P::first(), generation).await;
    }

    async fn fetch_next_page(&self) {
        let Some(request) = lock(&self.last_request).clone() else {
            debug!("📄 No previous request for {}, ignoring next page", self.key);
            return;
        };

        let page = {
            let mut current = lock(&self.page);
            *current = current.next();
            current.clone()
        };
        let generation = self.generation.load(Ordering::SeqCst);
        debug!("📄 NEXT PAGE: {} -> {}", self.key, page);

        self.fetch_page(request, page, generation).await;
    }

    async fn fetch_page(&self, request: R, page: P, generation: u64) {
        let key = (self.key_adapter)(&self.key, &request).appending(&page);
        let fetcher = &self.fetcher;
        let mut slot = None;

        pipeline::perform(
            self.cache.as_ref(),
            &self.cache_config,
            &key,
            || fetcher.fetch_page(request, page),
            |state| self.apply(state, &mut slot, generation),
        )
        .await;
    }

    /// Records a page-level transition and derives the observed state.
    ///
    /// A successful page is appended at the current end and `slot` remembers
    /// where. A second success from the same fetch (a cached page followed by
    /// its live copy) replaces that range instead of appending again. Pages
    /// fetched before the last `refetch` no longer touch the accumulation.
    fn apply(&self, page_state: State<Vec<E>>, slot: &mut Option<Range<usize>>, generation: u64) {
        let _dispatch = lock(&self.dispatch);
        self.page_state.transition(page_state.clone());

        let observed = match page_state {
            State::Succeeded(elements) => {
                if self.generation.load(Ordering::SeqCst) == generation {
                    self.accumulated.send_modify(|accumulated| {
                        let len = elements.len();
                        let start = match slot.take() {
                            Some(range) if range.end <= accumulated.len() => {
                                accumulated.splice(range.clone(), elements);
                                range.start
                            }
                            _ => {
                                let start = accumulated.len();
                                accumulated.extend(elements);
                                start
                            }
                        };
                        *slot = Some(start..start + len);
                    });
                } else {
                    debug!("📄 Dropping page from before the last refetch of {}", self.key);
                }
                State::Succeeded(self.accumulated.borrow().clone())
            }
            other => other,
        };
        self.state.transition(observed);
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
            InvalidationPayload::LastData => match lock(&self.last_request).clone() {
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

impl<R, P, E> ControllerHandle for PaginatedInner<R, P, E>
where
    R: Clone + Send + Sync + 'static,
    P: PageIdentifier,
    E: Clone + Send + Sync + 'static,
{
    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn kind(&self) -> ControllerKind {
        ControllerKind::PaginatedQuery
    }

    fn state_kind(&self) -> StateKind {
        self.state.get().kind()
    }

    fn refetch_last(&self) {
        self.handle_invalidation(InvalidationPayload::LastData);
    }
}

impl<R, P, E> Drop for PaginatedInner<R, P, E> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.bus.unsubscribe(self.subscription_id);
        self.registry.unregister(&self.key);
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configures and builds a [`PaginatedQuery`]
pub struct PaginatedQueryBuilder<R, P, E> {
    key: QueryKey,
    fetcher: Arc<dyn PageFetcher<R, P, E>>,
    key_adapter: KeyAdapter<R>,
    start: StartBehavior<R>,
    overrides: Overrides<Vec<E>>,
}

impl<R, P, E> PaginatedQueryBuilder<R, P, E>
where
    R: Clone + Send + Sync + 'static,
    P: PageIdentifier,
    E: Clone + Send + Sync + 'static,
{
    fn new(key: QueryKey, fetcher: Arc<dyn PageFetcher<R, P, E>>) -> Self {
        Self {
            key,
            fetcher,
            key_adapter: identity_adapter(),
            start: StartBehavior::StartWhenRequested,
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
    pub fn environment(mut self, environment: &QueryEnvironment) -> Self {
        self.overrides.environment = Some(environment.clone());
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn QueryCache<Vec<E>>>) -> Self {
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

    /// Same start-up sequence as a plain query; hydration reads the first
    /// page of the base key
    pub async fn build(self) -> PaginatedQuery<R, P, E> {
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
        let hydrated = if hydrate {
            let first_page = self.key.appending(P::first());
            get_valid(cache.as_ref(), &first_page, Utc::now(), &cache_config.invalidation_policy).await
        } else {
            None
        };
        let (page_state, state, accumulated) = match hydrated {
            Some(elements) => (
                State::Succeeded(elements.clone()),
                State::Succeeded(elements.clone()),
                elements,
            ),
            None => (State::Idle, State::Idle, Vec::new()),
        };
        debug!("🚀 PAGINATED QUERY READY: {} ({} cached)", self.key, accumulated.len());

        let subscription = bus.listen::<R>(self.key.clone());
        let shutdown = CancellationToken::new();
        let (accumulated, _) = watch::channel(accumulated);

        let inner = Arc::new_cyclic(|self_ref| PaginatedInner {
            key: self.key.clone(),
            key_adapter: self.key_adapter,
            fetcher: self.fetcher,
            cache,
            cache_config,
            dispatch: Mutex::new(()),
            page_state: StateCell::new(page_state),
            state: StateCell::new(state),
            accumulated,
            generation: AtomicU64::new(0),
            page: Mutex::new(P::first()),
            last_request: Mutex::new(None),
            shutdown: shutdown.clone(),
            subscription_id: subscription.id(),
            bus,
            registry: registry.clone(),
            self_ref: self_ref.clone(),
        });

        PaginatedInner::spawn_listener(Arc::downgrade(&inner), subscription, shutdown);
        let handle: Weak<dyn ControllerHandle> = Arc::downgrade(&inner) as Weak<dyn ControllerHandle>;
        registry.register(self.key, handle);

        if let StartBehavior::StartImmediately(request) = self.start {
            inner.spawn_refetch(request);
        }

        PaginatedQuery { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::query::page::PageNumber;
    use crate::query::policy::InvalidationPolicy;

    fn numbers(_: String, page: PageNumber) -> futures::future::Ready<Result<Vec<u32>>> {
        let start = (page.get() - 1) * 2 + 1;
        futures::future::ready(Ok(vec![start, start + 1]))
    }

    fn env(usage: UsagePolicy) -> QueryEnvironment {
        QueryEnvironment::new()
            .with_cache_config(CacheConfig::new(usage, InvalidationPolicy::ttl_secs(60)))
    }

    #[tokio::test]
    async fn test_page_keys_include_page() {
        let env = env(UsagePolicy::AlwaysFetch);
        let query: PaginatedQuery<String, PageNumber, u32> = PaginatedQuery::builder("feed", numbers)
            .key_adapter(|key, request: &String| key.appending(request))
            .environment(&env)
            .build()
            .await;

        query.refetch("alice".to_string()).await;
        query.fetch_next_page().await;

        let page_two = QueryKey::new("feed").appending("alice").appending(PageNumber::first().next());
        let stored: Option<Vec<u32>> = env.cache.get(&page_two).await;
        assert_eq!(stored, Some(vec![3, 4]));
        assert_eq!(query.page_state(), State::Succeeded(vec![3, 4]));
        assert_eq!(query.current_page().get(), 2);
    }

    #[tokio::test]
    async fn test_cached_page_is_not_counted_twice() {
        let env = env(UsagePolicy::UseAndThenFetch);
        env.cache
            .save(vec![1_u32, 2], &QueryKey::new("feed").appending(PageNumber::first()), Utc::now())
            .await;

        let query: PaginatedQuery<String, PageNumber, u32> = PaginatedQuery::builder("feed", numbers)
            .environment(&env)
            .build()
            .await;
        assert_eq!(query.state(), State::Succeeded(vec![1, 2]));

        let mut updates = query.updates();
        query.refetch("r".to_string()).await;

        assert_eq!(updates.recv().await.ok(), Some(State::Succeeded(vec![1, 2])));
        assert_eq!(updates.recv().await.ok(), Some(State::Succeeded(vec![1, 2])));
        assert_eq!(query.accumulated(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_next_page_keeps_accumulation() {
        let env = env(UsagePolicy::AlwaysFetch);
        let fetcher = |_: String, page: PageNumber| {
            futures::future::ready(if page.get() == 2 {
                Err(Error::fetch("page 2 unavailable"))
            } else {
                Ok(vec![page.get()])
            })
        };
        let query: PaginatedQuery<String, PageNumber, u32> = PaginatedQuery::builder("gaps", fetcher)
            .environment(&env)
            .build()
            .await;

        query.refetch("r".to_string()).await;
        query.fetch_next_page().await;
        assert!(query.state().error().is_some());
        assert_eq!(query.current_page().get(), 2);
        assert_eq!(query.accumulated(), vec![1]);

        query.fetch_next_page().await;
        assert_eq!(query.state(), State::Succeeded(vec![1, 3]));
    }

    #[tokio::test]
    async fn test_page_from_before_refetch_is_dropped() {
        let env = env(UsagePolicy::AlwaysFetch);
        let query: PaginatedQuery<String, PageNumber, u32> = PaginatedQuery::builder("feed", numbers)
            .environment(&env)
            .build()
            .await;
        query.refetch("a".to_string()).await;

        let stale = query.inner.generation.load(Ordering::SeqCst);
        query.refetch("b".to_string()).await;
        query.inner.apply(State::Succeeded(vec![9, 9]), &mut None, stale);

        assert_eq!(query.accumulated(), vec![1, 2]);
        assert_eq!(query.page_state(), State::Succeeded(vec![9, 9]));
    }
}

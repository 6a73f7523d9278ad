/**
 * Keyed invalidation bus
 *
 * Controllers listen on their key; mutations (or anything else holding the
 * bus) publish events naming a key. Delivery is fan-out to the subscribers
 * present at publish time, with no buffering for late subscribers.
 */
use super::key::QueryKey;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a subscriber should re-fetch with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationPayload<R> {
    /// Replay the most recent request
    LastData,
    /// Use this request instead
    NewData(R),
}

#[derive(Debug, Clone)]
pub struct InvalidationEvent<R> {
    pub key: QueryKey,
    pub payload: InvalidationPayload<R>,
}

#[derive(Clone)]
enum ErasedPayload {
    LastData,
    NewData(Arc<dyn Any + Send + Sync>),
}

impl ErasedPayload {
    fn erase<R: Send + Sync + 'static>(payload: InvalidationPayload<R>) -> Self {
        match payload {
            InvalidationPayload::LastData => Self::LastData,
            InvalidationPayload::NewData(request) => Self::NewData(Arc::new(request)),
        }
    }
}

struct Subscriber {
    id: Uuid,
    sender: mpsc::UnboundedSender<ErasedPayload>,
}

#[derive(Default)]
pub struct InvalidationBus {
    subscribers: RwLock<HashMap<QueryKey, Vec<Subscriber>>>,
}

impl std::fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("active_subscriptions", &self.active_subscriptions())
            .finish()
    }
}

impl InvalidationBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to events for exactly `key`, typed by request type `R`
    pub fn listen<R>(self: &Arc<Self>, key: QueryKey) -> Subscription<R>
    where
        R: Clone + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .push(Subscriber { id, sender: tx });
        debug!("📡 LISTEN: {} ({})", key, id);

        Subscription {
            id,
            key,
            rx,
            bus: Arc::downgrade(self),
            _request: PhantomData,
        }
    }

    /// Delivers `payload` to every current subscriber of `key`.
    ///
    /// Returns how many subscribers it reached.
    pub fn invalidate<R>(&self, key: &QueryKey, payload: InvalidationPayload<R>) -> usize
    where
        R: Send + Sync + 'static,
    {
        let erased = ErasedPayload::erase(payload);
        let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);

        let delivered = subscribers.get(key).map_or(0, |subs| {
            subs.iter()
                // Send fails only if the receiver was dropped
                .filter(|s| s.sender.send(erased.clone()).is_ok())
                .count()
        });
        drop(subscribers);

        debug!("🔔 INVALIDATE: {} -> {} subscriber(s)", key, delivered);
        delivered
    }

    pub fn publish<R>(&self, event: InvalidationEvent<R>) -> usize
    where
        R: Send + Sync + 'static,
    {
        self.invalidate(&event.key, event.payload)
    }

    pub fn unsubscribe(&self, subscription_id: Uuid) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before: usize = subs.values().map(Vec::len).sum();

        for subscriptions in subs.values_mut() {
            subscriptions.retain(|s| s.id != subscription_id);
        }

        // Clean up empty entries
        subs.retain(|_, v| !v.is_empty());
        let after: usize = subs.values().map(Vec::len).sum();
        before != after
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

/// A live subscription to one key. Unsubscribes when dropped.
pub struct Subscription<R> {
    id: Uuid,
    key: QueryKey,
    rx: mpsc::UnboundedReceiver<ErasedPayload>,
    bus: Weak<InvalidationBus>,
    _request: PhantomData<fn() -> R>,
}

impl<R> Subscription<R>
where
    R: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Next payload for this subscriber; `None` once the bus is gone.
    /// Requests of another type than `R` are skipped.
    pub async fn recv(&mut self) -> Option<InvalidationPayload<R>> {
        loop {
            match self.rx.recv().await? {
                ErasedPayload::LastData => return Some(InvalidationPayload::LastData),
                ErasedPayload::NewData(request) => {
                    if let Some(request) = request.downcast_ref::<R>() {
                        return Some(InvalidationPayload::NewData(request.clone()));
                    }
                    warn!(
                        "⚠️  Ignoring invalidation for {}: request is not a {}",
                        self.key,
                        std::any::type_name::<R>()
                    );
                }
            }
        }
    }
}

impl<R> Drop for Subscription<R> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Publishing handle given to mutation success hooks
#[derive(Debug, Clone)]
pub struct Invalidator {
    bus: Arc<InvalidationBus>,
}

impl Invalidator {
    #[must_use]
    pub const fn new(bus: Arc<InvalidationBus>) -> Self {
        Self { bus }
    }

    pub fn invalidate<R>(&self, key: &QueryKey, payload: InvalidationPayload<R>) -> usize
    where
        R: Send + Sync + 'static,
    {
        self.bus.invalidate(key, payload)
    }

    /// Subscribers of `key` replay their last request
    pub fn invalidate_last_data(&self, key: &QueryKey) -> usize {
        self.bus.invalidate::<()>(key, InvalidationPayload::LastData)
    }

    /// Subscribers of `key` re-fetch with `request`
    pub fn invalidate_with<R>(&self, key: &QueryKey, request: R) -> usize
    where
        R: Send + Sync + 'static,
    {
        self.bus.invalidate(key, InvalidationPayload::NewData(request))
    }
}

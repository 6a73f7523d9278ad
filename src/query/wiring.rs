use super::cache::QueryCache;
use super::config::CacheConfig;
use super::invalidation::InvalidationBus;
use super::registry::Registry;
use crate::environment::QueryEnvironment;
use std::sync::Arc;

/// Collaborators set on a builder, each optional
pub(crate) struct Overrides<T> {
    pub environment: Option<QueryEnvironment>,
    pub cache: Option<Arc<dyn QueryCache<T>>>,
    pub cache_config: Option<CacheConfig>,
    pub bus: Option<Arc<InvalidationBus>>,
    pub registry: Option<Arc<Registry>>,
}

/// Collaborators a controller is built with
pub(crate) struct Wiring<T> {
    pub cache: Arc<dyn QueryCache<T>>,
    pub cache_config: CacheConfig,
    pub bus: Arc<InvalidationBus>,
    pub registry: Arc<Registry>,
}

impl<T> Default for Overrides<T> {
    fn default() -> Self {
        Self {
            environment: None,
            cache: None,
            cache_config: None,
            bus: None,
            registry: None,
        }
    }
}

impl<T> Overrides<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fills every unset collaborator from the environment, or the global one
    pub fn resolve(self) -> Wiring<T> {
        let env = self.environment.unwrap_or_else(QueryEnvironment::global);
        Wiring {
            cache: self
                .cache
                .unwrap_or_else(|| env.cache.clone() as Arc<dyn QueryCache<T>>),
            cache_config: self.cache_config.unwrap_or_else(|| env.cache_config.clone()),
            bus: self.bus.unwrap_or_else(|| env.bus.clone()),
            registry: self.registry.unwrap_or_else(|| env.registry.clone()),
        }
    }
}

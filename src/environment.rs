/**
Process-wide defaults for `querykit`

Controllers need a cache, an invalidation bus, a registry and a cache
configuration. A `QueryEnvironment` bundles the four; the global one is set
once at startup with [`QueryEnvironment::initialize`] and is what builders
fall back to when no environment is passed explicitly.
*/
use crate::error::{Error, Result};
use crate::query::{CacheConfig, InvalidationBus, Invalidator, MemoryCache, Registry};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

/// Global environment instance
static GLOBAL: OnceLock<QueryEnvironment> = OnceLock::new();

#[derive(Debug, Clone, Default)]
pub struct QueryEnvironment {
    pub cache: Arc<MemoryCache>,
    pub bus: Arc<InvalidationBus>,
    pub registry: Arc<Registry>,
    pub cache_config: CacheConfig,
}

impl QueryEnvironment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<MemoryCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.cache_config = cache_config;
        self
    }

    /// Publishing handle on this environment's bus
    #[must_use]
    pub fn invalidator(&self) -> Invalidator {
        Invalidator::new(self.bus.clone())
    }

    /// Installs `env` as the process-wide environment
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if a global environment exists, including
    /// one created lazily by an earlier call to [`QueryEnvironment::global`]
    pub fn initialize(env: Self) -> Result<()> {
        if GLOBAL.set(env).is_err() {
            error!("Query environment already initialized");
            return Err(Error::AlreadyInitialized("query environment".to_string()));
        }
        info!("Query environment initialized");
        Ok(())
    }

    /// The global environment, created with defaults on first use if
    /// `initialize` was never called
    #[must_use]
    pub fn global() -> Self {
        GLOBAL
            .get_or_init(|| {
                warn!("Query environment not initialized, using defaults");
                Self::default()
            })
            .clone()
    }

    /// Returns None if no global environment exists yet
    #[must_use]
    pub fn try_global() -> Option<Self> {
        GLOBAL.get().cloned()
    }
}

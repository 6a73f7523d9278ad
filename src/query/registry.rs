use super::key::QueryKey;
use super::state::StateKind;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Query,
    PaginatedQuery,
}

/// What the registry can see of a live controller, independent of its
/// request and response types
pub trait ControllerHandle: Send + Sync {
    fn key(&self) -> &QueryKey;

    fn kind(&self) -> ControllerKind;

    fn state_kind(&self) -> StateKind;

    /// Spawns a refetch with the stored last request; no-op without one
    fn refetch_last(&self);
}

/// Non-owning directory of live controllers, one per key
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<QueryKey, Weak<dyn ControllerHandle>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("entries", &self.len()).finish()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any previous entry for the key
    pub fn register(&self, key: QueryKey, handle: Weak<dyn ControllerHandle>) {
        debug!("📇 REGISTER: {}", key);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, handle);
    }

    pub fn unregister(&self, key: &QueryKey) {
        debug!("📇 UNREGISTER: {}", key);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// The live controller registered under `key`, if it is still alive
    pub fn lookup(&self, key: &QueryKey) -> Option<Arc<dyn ControllerHandle>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(Weak::upgrade)
    }

    /// Keys of live controllers; dead entries are dropped on the way
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, handle| handle.strong_count() > 0);
        entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|handle| handle.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

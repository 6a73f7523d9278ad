pub mod behavior;
pub mod cache;
pub mod cached_data;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod fetcher;
pub mod invalidation;
pub mod key;
pub mod memory_cache;
pub mod mutation;
pub mod page;
pub mod paginated;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod state;
mod wiring;

pub use behavior::{KeyAdapter, PollingBehavior, StartBehavior};
pub use cache::QueryCache;
pub use cached_data::CacheEntry;
pub use config::CacheConfig;
pub use controller::{Query, QueryBuilder};
pub use fetcher::{Fetcher, PageFetcher};
pub use invalidation::{InvalidationBus, InvalidationEvent, InvalidationPayload, Invalidator, Subscription};
pub use key::QueryKey;
pub use memory_cache::{CacheStats, MemoryCache};
pub use mutation::Mutation;
pub use page::{Offset, PageIdentifier, PageNumber};
pub use paginated::{PaginatedQuery, PaginatedQueryBuilder};
pub use policy::{InvalidationPolicy, UsagePolicy};
pub use registry::{ControllerHandle, ControllerKind, Registry};
pub use state::{State, StateKind};

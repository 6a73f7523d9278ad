//! querykit - client-side query orchestration
//!
//! Controllers that fetch values through user-supplied async functions and
//! reconcile them with a cache:
//! - `Query`: one value per request, with cache usage policies and polling
//! - `PaginatedQuery`: pages accumulated into one growing sequence
//! - `Mutation`: one-shot operations that invalidate queries on success
//!
//! Queries listen on an `InvalidationBus` for their key and register in a
//! non-owning `Registry`. Shared collaborators live in a `QueryEnvironment`,
//! injected per controller or installed process-wide.

pub mod environment;
pub mod error;
pub mod query;

pub use environment::QueryEnvironment;
pub use error::{Error, Result};

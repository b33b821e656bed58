//! Cache Resources
//!
//! Refcounted caches owned by cache boundaries, plus the per-root pool used
//! while a boundary mounts.
//!
//! Teardown never happens inline. Releasing the last reference schedules the
//! cache's abort through the injected [`TaskScheduler`], so work already
//! queued at higher priority runs first. In-flight work keyed to the cache
//! observes the abort through its [`AbortSignal`].
//!
//! [`TaskScheduler`]: crate::scheduler::TaskScheduler

mod abort;
mod pool;
mod store;

pub use abort::{AbortController, AbortSignal};
pub use pool::{release_pooled_cache, request_cache_from_pool};
pub use store::Cache;

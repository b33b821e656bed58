//! Refcounted memoization cache.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::abort::{AbortController, AbortSignal};
use crate::scheduler::{SchedulerPriority, TaskScheduler};

/// A cache shared by a subtree, alive while something retains it.
///
/// Reads through [`Cache::get_for_type`] are memoized per resource
/// constructor and never leak into another cache instance. Once the last retainer releases
/// it, the cache's abort signal fires from a scheduled callback.
pub struct Cache {
    ref_count: AtomicU32,
    data: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    controller: AbortController,
    abort_scheduled: AtomicBool,
}

impl Cache {
    /// A fresh cache with no retainers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ref_count: AtomicU32::new(0),
            data: DashMap::new(),
            controller: AbortController::new(),
            abort_scheduled: AtomicBool::new(false),
        })
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn signal(&self) -> AbortSignal {
        self.controller.signal()
    }

    pub fn is_aborted(&self) -> bool {
        self.controller.is_aborted()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn retain(&self) {
        if cfg!(debug_assertions) && self.is_aborted() {
            warn!("a cache instance was retained after it was already freed");
        }
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. At zero the abort is handed to `scheduler`; it
    /// is scheduled at most once per cache.
    pub fn release(
        self: &Arc<Self>,
        scheduler: &dyn TaskScheduler,
        priority: SchedulerPriority,
    ) {
        let previous = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        match previous {
            Err(_) => {
                if cfg!(debug_assertions) {
                    warn!("a cache instance was released more times than it was retained");
                }
            }
            Ok(1) => {
                if self.abort_scheduled.swap(true, Ordering::AcqRel) {
                    return;
                }
                debug!(?priority, "scheduling cache abort");
                let cache = Arc::clone(self);
                scheduler.schedule_callback(
                    priority,
                    Box::new(move || {
                        cache.controller.abort();
                    }),
                );
            }
            Ok(_) => {}
        }
    }

    /// Read the resource built by `init`, running it on first use.
    ///
    /// Entries are keyed by the constructor's type: every fn item and every
    /// closure is its own resource, even when two of them return the same
    /// type. Under a race two callers may both run `init`; only the first
    /// stored value is kept and returned to both.
    pub fn get_for_type<R, F>(&self, init: F) -> Arc<R>
    where
        R: Any + Send + Sync,
        F: FnOnce() -> R + 'static,
    {
        let key = TypeId::of::<F>();
        let existing = self.data.get(&key).map(|entry| Arc::clone(entry.value()));
        if let Some(found) = existing.and_then(|value| value.downcast::<R>().ok()) {
            return found;
        }

        let fresh = Arc::new(init());
        let stored = Arc::clone(
            self.data
                .entry(key)
                .or_insert_with(|| fresh.clone() as Arc<dyn Any + Send + Sync>)
                .value(),
        );
        stored.downcast::<R>().unwrap_or(fresh)
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("ref_count", &self.ref_count())
            .field("entries", &self.data.len())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

//! The process-wide default transition indicator.
//!
//! A host may register one callback that shows a busy indicator while async
//! actions are pending and returns a cleanup that hides it. If two different
//! callbacks are registered, nobody owns the indicator and it is disabled.

use std::sync::Arc;

/// Hides the indicator.
pub type IndicatorCleanup = Box<dyn FnOnce() + Send + 'static>;

/// Shows the indicator and returns how to hide it.
pub type IndicatorCallback = Arc<dyn Fn() -> IndicatorCleanup + Send + Sync + 'static>;

#[derive(Default)]
enum Registration {
    #[default]
    Unset,
    Unique(IndicatorCallback),
    Ambiguous,
}

#[derive(Default)]
enum Showing {
    #[default]
    Idle,
    /// The callback is running outside the lock.
    Starting,
    Shown(IndicatorCleanup),
}

/// Indicator bookkeeping, kept under the entangler's lock.
#[derive(Default)]
pub(crate) struct DefaultIndicator {
    registration: Registration,
    showing: Showing,
    /// Set when a new scope starts and cleared once something handled it.
    pub(crate) needed: bool,
    /// Roots with pending transitions that still want the indicator shown.
    pub(crate) retained_roots: u32,
}

impl DefaultIndicator {
    pub(crate) fn is_ambiguous(&self) -> bool {
        matches!(self.registration, Registration::Ambiguous)
    }

    pub(crate) fn is_showing(&self) -> bool {
        !matches!(self.showing, Showing::Idle)
    }

    /// Register `callback`. Returns a cleanup to run if this registration
    /// made the indicator ambiguous while it was shown.
    pub(crate) fn register(&mut self, callback: IndicatorCallback) -> Option<IndicatorCleanup> {
        match &self.registration {
            Registration::Unset => {
                self.registration = Registration::Unique(callback);
                None
            }
            Registration::Unique(existing) if Arc::ptr_eq(existing, &callback) => None,
            Registration::Unique(_) => {
                self.registration = Registration::Ambiguous;
                self.stop()
            }
            Registration::Ambiguous => None,
        }
    }

    /// Claim the right to show the indicator. The returned callback must be
    /// invoked outside the lock and its cleanup handed to [`Self::started`].
    pub(crate) fn begin_start(&mut self) -> Option<IndicatorCallback> {
        if !self.needed || !matches!(self.showing, Showing::Idle) {
            return None;
        }
        match &self.registration {
            Registration::Unique(callback) => {
                self.showing = Showing::Starting;
                Some(Arc::clone(callback))
            }
            _ => None,
        }
    }

    /// Finish a start. Hands the cleanup back if the indicator was stopped
    /// while the callback ran.
    pub(crate) fn started(&mut self, cleanup: IndicatorCleanup) -> Option<IndicatorCleanup> {
        match self.showing {
            Showing::Starting => {
                self.showing = Showing::Shown(cleanup);
                None
            }
            _ => Some(cleanup),
        }
    }

    /// Take the cleanup of a shown indicator.
    pub(crate) fn stop(&mut self) -> Option<IndicatorCleanup> {
        match std::mem::take(&mut self.showing) {
            Showing::Shown(cleanup) => Some(cleanup),
            Showing::Starting | Showing::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(shown: Arc<AtomicUsize>) -> IndicatorCallback {
        Arc::new(move || {
            shown.fetch_add(1, Ordering::SeqCst);
            Box::new(|| {})
        })
    }

    #[test]
    fn same_callback_stays_unique() {
        let callback = counting_callback(Arc::new(AtomicUsize::new(0)));
        let mut indicator = DefaultIndicator::default();
        assert!(indicator.register(callback.clone()).is_none());
        assert!(indicator.register(callback).is_none());
        assert!(!indicator.is_ambiguous());
    }

    #[test]
    fn second_callback_makes_it_ambiguous() {
        let shown = Arc::new(AtomicUsize::new(0));
        let mut indicator = DefaultIndicator::default();
        indicator.register(counting_callback(shown.clone()));

        indicator.needed = true;
        let callback = indicator.begin_start().unwrap();
        assert!(indicator.started(callback()).is_none());
        assert!(indicator.is_showing());

        let cleanup = indicator.register(counting_callback(shown.clone()));
        assert!(cleanup.is_some());
        assert!(indicator.is_ambiguous());
        assert!(!indicator.is_showing());
        assert!(indicator.begin_start().is_none());
        assert_eq!(shown.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_during_start_returns_cleanup() {
        let mut indicator = DefaultIndicator::default();
        indicator.register(counting_callback(Arc::new(AtomicUsize::new(0))));
        indicator.needed = true;

        let callback = indicator.begin_start().unwrap();
        assert!(indicator.begin_start().is_none());
        assert!(indicator.stop().is_none());
        assert!(indicator.started(callback()).is_some());
        assert!(!indicator.is_showing());
    }
}

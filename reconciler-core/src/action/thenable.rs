//! Completion handles for entangled action scopes.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use smallvec::SmallVec;
use tokio::sync::watch;
use tracing::trace;

/// Called once when a scope completes. Carries no value: the scope tracks
/// completion, not outcome.
pub type ActionListener = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThenableStatus {
    Pending,
    Fulfilled,
}

struct ThenableState {
    status: ThenableStatus,
    listeners: SmallVec<[ActionListener; 4]>,
}

/// Settles once every action entangled in a scope has settled.
pub struct EntangledThenable {
    state: Mutex<ThenableState>,
    settled: watch::Sender<bool>,
}

impl EntangledThenable {
    pub(crate) fn new() -> Arc<Self> {
        let (settled, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(ThenableState {
                status: ThenableStatus::Pending,
                listeners: SmallVec::new(),
            }),
            settled,
        })
    }

    pub fn status(&self) -> ThenableStatus {
        self.state.lock().status
    }

    pub fn is_settled(&self) -> bool {
        self.status() == ThenableStatus::Fulfilled
    }

    /// Register a listener. Listeners fire in registration order; one added
    /// after completion fires immediately.
    pub fn then(&self, listener: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if state.status == ThenableStatus::Fulfilled {
            drop(state);
            listener();
            return;
        }
        state.listeners.push(Box::new(listener));
    }

    /// Wait for the scope to complete.
    pub async fn wait(&self) {
        let mut receiver = self.settled.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver.wait_for(|settled| *settled).await;
    }

    pub(crate) fn fulfill(&self) {
        let listeners = {
            let mut state = self.state.lock();
            if state.status == ThenableStatus::Fulfilled {
                return;
            }
            state.status = ThenableStatus::Fulfilled;
            std::mem::take(&mut state.listeners)
        };
        self.settled.send_replace(true);
        trace!(count = listeners.len(), "entangled scope complete");
        for listener in listeners {
            listener();
        }
    }
}

impl std::fmt::Debug for EntangledThenable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EntangledThenable")
            .field("status", &state.status)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// A thenable that yields a fixed value once the wrapped scope completes.
#[derive(Debug, Clone)]
pub struct ChainedValue<T> {
    thenable: Arc<EntangledThenable>,
    value: T,
}

/// Chain `value` onto `thenable`: the result settles with the scope and
/// resolves to `value` instead of carrying nothing.
pub fn chain_thenable_value<T>(thenable: &Arc<EntangledThenable>, value: T) -> ChainedValue<T> {
    ChainedValue {
        thenable: Arc::clone(thenable),
        value,
    }
}

impl<T: Clone + Send + 'static> ChainedValue<T> {
    pub fn status(&self) -> ThenableStatus {
        self.thenable.status()
    }

    /// The value, once the scope has settled.
    pub fn value(&self) -> Option<T> {
        self.thenable.is_settled().then(|| self.value.clone())
    }

    pub fn then(&self, listener: impl FnOnce(T) + Send + 'static) {
        let value = self.value.clone();
        self.thenable.then(move || listener(value));
    }

    pub async fn wait(&self) -> T {
        self.thenable.wait().await;
        self.value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_fire_once_in_order() {
        let thenable = EntangledThenable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            thenable.then(move || log.lock().push(i));
        }
        assert_eq!(thenable.status(), ThenableStatus::Pending);

        thenable.fulfill();
        thenable.fulfill();
        assert_eq!(*log.lock(), vec![0, 1, 2]);

        let late = log.clone();
        thenable.then(move || late.lock().push(3));
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn chained_value_resolves_with_scope() {
        let thenable = EntangledThenable::new();
        let chained = chain_thenable_value(&thenable, "saved");
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        chained.then(move |value| *sink.lock() = Some(value));

        assert_eq!(chained.value(), None);
        thenable.fulfill();
        assert_eq!(chained.value(), Some("saved"));
        assert_eq!(*seen.lock(), Some("saved"));
    }

    #[tokio::test]
    async fn wait_resolves_after_fulfill() {
        let thenable = EntangledThenable::new();
        let waiter = {
            let thenable = thenable.clone();
            tokio::spawn(async move { thenable.wait().await })
        };
        thenable.fulfill();
        waiter.await.unwrap();
        assert!(thenable.is_settled());
    }
}

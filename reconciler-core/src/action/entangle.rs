//! Async action scopes.
//!
//! Async actions started while another one is still pending share a single
//! scope and a single transition lane. There is no reliable way to tell
//! which action a later update belongs to, so they are treated as one
//! transaction: the scope completes only once all of them have settled.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use super::indicator::{DefaultIndicator, IndicatorCallback, IndicatorCleanup};
use super::thenable::EntangledThenable;
use crate::error::{ReconcileError, Result};
use crate::lane::{Lane, NO_LANE};

struct ActionScope {
    lane: Lane,
    pending: usize,
    thenable: Arc<EntangledThenable>,
}

#[derive(Default)]
struct EntanglerState {
    scope: Option<ActionScope>,
    indicator: DefaultIndicator,
    indicator_enabled: bool,
}

/// The entangled action scope and default indicator of one reconciler.
///
/// Cloning shares the state; settlement arrives from tokio tasks.
#[derive(Clone)]
pub struct ActionEntangler {
    state: Arc<Mutex<EntanglerState>>,
}

impl ActionEntangler {
    pub fn new(indicator_enabled: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(EntanglerState {
                indicator_enabled,
                ..EntanglerState::default()
            })),
        }
    }

    /// Join `action` to the current scope, creating one if none is active.
    ///
    /// `request_lane` is only called when a new scope starts; joining an
    /// active scope reuses its lane. The scope is pinged when the action
    /// settles, whatever its output, and also if the task is cancelled or
    /// panics. The returned handle yields the action's own output.
    pub fn entangle<F>(
        &self,
        request_lane: impl FnOnce() -> Lane,
        action: F,
    ) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| ReconcileError::NoAsyncRuntime)?;
        {
            let mut state = self.state.lock();
            let indicator_enabled = state.indicator_enabled;
            if state.scope.is_none() {
                let lane = request_lane();
                debug!(lane = %lane, "starting entangled action scope");
                state.scope = Some(ActionScope {
                    lane,
                    pending: 0,
                    thenable: EntangledThenable::new(),
                });
                if indicator_enabled {
                    state.indicator.needed = true;
                }
            }
            if let Some(scope) = state.scope.as_mut() {
                scope.pending += 1;
            }
        }

        let guard = PingOnDrop(self.clone());
        Ok(handle.spawn(async move {
            let _guard = guard;
            action.await
        }))
    }

    fn ping(&self) {
        let (thenable, cleanup) = {
            let mut state = self.state.lock();
            let Some(scope) = state.scope.as_mut() else {
                return;
            };
            scope.pending = scope.pending.saturating_sub(1);
            if scope.pending > 0 {
                return;
            }
            let Some(scope) = state.scope.take() else {
                return;
            };
            state.indicator.needed = false;
            let cleanup = if state.indicator.retained_roots == 0 {
                state.indicator.stop()
            } else {
                None
            };
            (scope.thenable, cleanup)
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }
        thenable.fulfill();
    }

    /// Lane of the active scope, or `NO_LANE`.
    pub fn peek_entangled_action_lane(&self) -> Lane {
        self.state
            .lock()
            .scope
            .as_ref()
            .map_or(NO_LANE, |scope| scope.lane)
    }

    pub fn peek_entangled_action_thenable(&self) -> Option<Arc<EntangledThenable>> {
        self.state
            .lock()
            .scope
            .as_ref()
            .map(|scope| Arc::clone(&scope.thenable))
    }

    /// Number of actions in the active scope still pending.
    pub fn pending_actions(&self) -> usize {
        self.state
            .lock()
            .scope
            .as_ref()
            .map_or(0, |scope| scope.pending)
    }

    // ------------------------------------------------------------------
    // Default transition indicator
    // ------------------------------------------------------------------

    /// Register the host's indicator callback. Registering a second,
    /// different callback disables the indicator for good.
    pub fn register_default_indicator(&self, callback: IndicatorCallback) {
        let cleanup = self.state.lock().indicator.register(callback);
        if let Some(cleanup) = cleanup {
            debug!("default transition indicator registered twice; disabling it");
            cleanup();
        }
    }

    /// Show the indicator if a scope started and nothing else handled it.
    pub fn start_default_indicator_if_needed(&self) {
        let Some(callback) = self.state.lock().indicator.begin_start() else {
            return;
        };
        let cleanup = callback();
        let stale: Option<IndicatorCleanup> = self.state.lock().indicator.started(cleanup);
        if let Some(stale) = stale {
            stale();
        }
    }

    /// Keep the indicator shown while a root still has pending transitions.
    /// Dropping the returned guard releases it.
    pub fn retain_indicator(&self) -> IndicatorRetainer {
        self.state.lock().indicator.retained_roots += 1;
        IndicatorRetainer {
            entangler: self.clone(),
        }
    }

    fn release_indicator(&self) {
        let cleanup = {
            let mut state = self.state.lock();
            state.indicator.retained_roots = state.indicator.retained_roots.saturating_sub(1);
            if state.indicator.retained_roots == 0 && state.scope.is_none() {
                state.indicator.stop()
            } else {
                None
            }
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    /// Whether an async action scope is keeping the indicator alive.
    pub fn has_ongoing_indicator(&self) -> bool {
        self.state.lock().scope.is_some()
    }

    /// A root showed its own indicator, so the default one is not needed.
    pub fn mark_indicator_handled(&self) {
        self.state.lock().indicator.needed = false;
    }

    pub fn is_indicator_showing(&self) -> bool {
        self.state.lock().indicator.is_showing()
    }
}

impl Default for ActionEntangler {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for ActionEntangler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ActionEntangler")
            .field("lane", &state.scope.as_ref().map(|s| s.lane))
            .field("pending", &state.scope.as_ref().map_or(0, |s| s.pending))
            .field("indicator_showing", &state.indicator.is_showing())
            .finish()
    }
}

struct PingOnDrop(ActionEntangler);

impl Drop for PingOnDrop {
    fn drop(&mut self) {
        self.0.ping();
    }
}

/// Holds the default indicator open for one root.
#[must_use = "the indicator is released when this guard is dropped"]
pub struct IndicatorRetainer {
    entangler: ActionEntangler,
}

impl Drop for IndicatorRetainer {
    fn drop(&mut self) {
        self.entangler.release_indicator();
    }
}

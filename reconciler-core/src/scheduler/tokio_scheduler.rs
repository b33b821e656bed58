//! A scheduler backed by the tokio runtime.
//!
//! Tokio has no task priorities, so less urgent callbacks yield to the
//! runtime a few times before running. That lets already queued work go
//! first without any starvation risk.

use tokio::runtime::Handle;
use tracing::trace;

use super::{SchedulerPriority, Task, TaskScheduler};
use crate::error::{ReconcileError, Result};

/// Runs callbacks as tokio tasks.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| ReconcileError::NoAsyncRuntime)
    }
}

fn yields_for(priority: SchedulerPriority) -> usize {
    match priority {
        SchedulerPriority::Immediate => 0,
        SchedulerPriority::UserBlocking => 1,
        SchedulerPriority::Normal => 2,
        SchedulerPriority::Low => 4,
        SchedulerPriority::Idle => 8,
    }
}

impl TaskScheduler for TokioScheduler {
    fn schedule_callback(&self, priority: SchedulerPriority, task: Task) {
        trace!(?priority, "scheduling callback on tokio");
        self.handle.spawn(async move {
            for _ in 0..yields_for(priority) {
                tokio::task::yield_now().await;
            }
            task();
        });
    }
}

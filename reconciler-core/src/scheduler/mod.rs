//! Task Scheduler Capability
//!
//! The core never time-slices on its own. Deferred work, such as tearing down
//! a cache nobody references anymore, is handed to an injected scheduler
//! together with a priority. Any `Fn(SchedulerPriority, Task)` closure is a
//! scheduler, so embedders can route callbacks into whatever task queue
//! their host already runs.

mod manual;
mod tokio_scheduler;

pub use manual::ManualScheduler;
pub use tokio_scheduler::TokioScheduler;

use serde::{Deserialize, Serialize};

/// Priority levels understood by the task scheduler, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPriority {
    Immediate,
    UserBlocking,
    Normal,
    Low,
    Idle,
}

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks later, in priority order.
pub trait TaskScheduler: Send + Sync {
    /// Queue `task` to run at `priority`. Must not run it synchronously.
    fn schedule_callback(&self, priority: SchedulerPriority, task: Task);
}

impl<F> TaskScheduler for F
where
    F: Fn(SchedulerPriority, Task) + Send + Sync,
{
    fn schedule_callback(&self, priority: SchedulerPriority, task: Task) {
        self(priority, task)
    }
}

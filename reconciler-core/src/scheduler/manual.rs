//! A scheduler that only runs tasks when asked to. Used by tests and by
//! hosts that drive their own event loop.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{SchedulerPriority, Task, TaskScheduler};

struct Queued {
    priority: SchedulerPriority,
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct Queue {
    tasks: Vec<Queued>,
    next_seq: u64,
}

/// A task queue flushed explicitly. Cloning shares the queue.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Arc<Mutex<Queue>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    /// Priorities of waiting tasks, in the order they would run.
    pub fn pending_priorities(&self) -> Vec<SchedulerPriority> {
        let queue = self.queue.lock();
        let mut queued: Vec<_> = queue.tasks.iter().map(|t| (t.priority, t.seq)).collect();
        queued.sort();
        queued.into_iter().map(|(priority, _)| priority).collect()
    }

    /// Run the most urgent waiting task. Returns false if there was none.
    pub fn run_next(&self) -> bool {
        let next = {
            let mut queue = self.queue.lock();
            let position = queue
                .tasks
                .iter()
                .enumerate()
                .min_by_key(|(_, t)| (t.priority, t.seq))
                .map(|(index, _)| index);
            position.map(|index| queue.tasks.remove(index))
        };
        // The lock is released before the task runs so it can schedule more.
        match next {
            Some(queued) => {
                (queued.task)();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks scheduled by the
    /// tasks being run. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule_callback(&self, priority: SchedulerPriority, task: Task) {
        let mut queue = self.queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.tasks.push(Queued {
            priority,
            seq,
            task,
        });
    }
}

//! Stack Cursor
//!
//! A cursor is a value with a history. Pushing saves the current value and
//! installs a new one; popping restores the saved value. Render traversal
//! pushes when it enters a fiber and pops when it completes the same fiber,
//! so the history always mirrors the path from the root to the fiber being
//! worked on.
//!
//! In debug builds a parallel stack records which fiber pushed each frame.
//! Popping from a different fiber is reported as [`ReconcileError::StackMismatch`].

use std::mem;

use crate::error::{ReconcileError, Result};
use crate::fiber::FiberId;

/// A typed push/pop value stack keyed by tree position.
#[derive(Debug, Clone)]
pub struct StackCursor<T> {
    current: T,
    stack: Vec<T>,
    #[cfg(debug_assertions)]
    owners: Vec<FiberId>,
}

impl<T> StackCursor<T> {
    /// Create a cursor whose value is `initial` when nothing is pushed.
    pub fn new(initial: T) -> Self {
        Self {
            current: initial,
            stack: Vec::new(),
            #[cfg(debug_assertions)]
            owners: Vec::new(),
        }
    }

    /// The value installed by the innermost push.
    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Install `value`, saving the previous value.
    pub fn push(&mut self, value: T, fiber: FiberId) {
        let previous = mem::replace(&mut self.current, value);
        self.stack.push(previous);

        #[cfg(debug_assertions)]
        self.owners.push(fiber);
        #[cfg(not(debug_assertions))]
        let _ = fiber;
    }

    /// Restore the value saved by the matching push and return the value
    /// that was current.
    pub fn pop(&mut self, fiber: FiberId) -> Result<T> {
        let Some(previous) = self.stack.pop() else {
            return Err(ReconcileError::StackUnderflow { fiber });
        };
        let popped = mem::replace(&mut self.current, previous);

        #[cfg(debug_assertions)]
        if let Some(owner) = self.owners.pop() {
            if owner != fiber {
                tracing::error!(?owner, ?fiber, "unexpected fiber popped");
                return Err(ReconcileError::StackMismatch {
                    expected: owner,
                    actual: fiber,
                });
            }
        }

        Ok(popped)
    }

    /// Drop every frame and go back to `initial`. Used when a render is
    /// thrown away.
    pub fn reset(&mut self, initial: T) {
        self.current = initial;
        self.stack.clear();
        #[cfg(debug_assertions)]
        self.owners.clear();
    }
}

impl<T: Default> Default for StackCursor<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

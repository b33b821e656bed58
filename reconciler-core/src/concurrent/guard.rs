//! Re-entrancy limits.
//!
//! Both guards turn an update loop that would never settle into a fatal
//! error instead of a hang.

use crate::error::{ReconcileError, Result};
use crate::fiber::RootId;

/// Counts synchronous re-renders of the same root triggered from commit.
#[derive(Debug, Clone)]
pub struct NestedUpdateGuard {
    limit: u32,
    count: u32,
    root: Option<RootId>,
}

impl NestedUpdateGuard {
    /// A guard that fails after `limit` nested commits.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            count: 0,
            root: None,
        }
    }

    /// Nested commits allowed before the loop is fatal.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Consecutive nested commits on the same root so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Record a finished commit. `sync_work_remaining` is whether the commit
    /// left synchronous work on the root, which means it will be rendered
    /// again right away.
    pub fn record_commit(&mut self, root: RootId, sync_work_remaining: bool) {
        if !sync_work_remaining {
            self.count = 0;
            self.root = None;
        } else if self.root == Some(root) {
            self.count += 1;
        } else {
            self.count = 0;
            self.root = Some(root);
        }
    }

    /// Fails once the same root was re-rendered more than `limit` times in
    /// a row. The counter resets so the next attempt starts fresh.
    pub fn check(&mut self) -> Result<()> {
        if self.count > self.limit {
            self.reset();
            return Err(ReconcileError::MaximumUpdateDepthExceeded { limit: self.limit });
        }
        Ok(())
    }

    /// Forget the current streak.
    pub fn reset(&mut self) {
        self.count = 0;
        self.root = None;
    }
}

/// Counts render-phase re-renders of a single component.
#[derive(Debug, Clone)]
pub struct RerenderGuard {
    limit: u32,
    count: u32,
}

impl RerenderGuard {
    /// A guard allowing `limit` re-render passes per component.
    pub fn new(limit: u32) -> Self {
        Self { limit, count: 0 }
    }

    /// Re-render passes taken by the current component.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Start another render pass of the same component.
    pub fn next_pass(&mut self) -> Result<u32> {
        if self.count >= self.limit {
            return Err(ReconcileError::TooManyReRenders { limit: self.limit });
        }
        self.count += 1;
        Ok(self.count)
    }

    /// The component finished rendering.
    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_updates_trip_after_limit() {
        let root = RootId(0);
        let mut guard = NestedUpdateGuard::new(3);

        for _ in 0..4 {
            guard.record_commit(root, true);
            assert!(guard.check().is_ok());
        }
        guard.record_commit(root, true);
        assert_eq!(
            guard.check(),
            Err(ReconcileError::MaximumUpdateDepthExceeded { limit: 3 })
        );
        assert_eq!(guard.count(), 0);
    }

    #[test]
    fn switching_roots_or_settling_resets() {
        let mut guard = NestedUpdateGuard::new(1);
        guard.record_commit(RootId(0), true);
        guard.record_commit(RootId(0), true);
        guard.record_commit(RootId(1), true);
        assert_eq!(guard.count(), 0);

        guard.record_commit(RootId(1), true);
        guard.record_commit(RootId(1), false);
        assert_eq!(guard.count(), 0);
        assert!(guard.check().is_ok());
    }

    #[test]
    fn rerenders_are_bounded() {
        let mut guard = RerenderGuard::new(2);
        assert_eq!(guard.next_pass(), Ok(1));
        assert_eq!(guard.next_pass(), Ok(2));
        assert_eq!(guard.next_pass(), Err(ReconcileError::TooManyReRenders { limit: 2 }));

        guard.reset();
        assert_eq!(guard.next_pass(), Ok(1));
    }
}

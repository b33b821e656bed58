//! Error Types
//!
//! Every fatal condition the core can hit is a variant of [`ReconcileError`].
//! These indicate either a bug in the core or a caller breaking its contract,
//! so they are returned rather than logged and swallowed.
//!
//! Non-fatal misuse (retaining an aborted cache, releasing a cache too many
//! times, updating a fiber that never mounted) is not an error. It is reported
//! through `tracing` in debug builds and otherwise ignored.

use crate::context::ContextId;
use crate::fiber::FiberId;

/// Result alias used throughout the crate.
pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

/// Fatal invariant violations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// A cursor was popped more times than it was pushed.
    #[error("Unexpected pop: cursor stack is empty (popped by fiber {fiber:?})")]
    StackUnderflow {
        /// The fiber that attempted the pop.
        fiber: FiberId,
    },

    /// A cursor frame was popped by a fiber other than the one that pushed it.
    #[error("Unexpected fiber popped: expected {expected:?}, got {actual:?}")]
    StackMismatch {
        /// The fiber that pushed the frame.
        expected: FiberId,
        /// The fiber that popped it.
        actual: FiberId,
    },

    /// A provider frame for a different context was on top of the stack.
    #[error("Context provider mismatch: expected {expected:?}, found {found:?}")]
    ProviderMismatch {
        /// The context being popped.
        expected: ContextId,
        /// The context found on top of the stack.
        found: ContextId,
    },

    /// Walking `return` pointers ended on something that is not a host root.
    #[error("Fiber {top:?} has no parent but is not a host root (walked from {source_fiber:?})")]
    NotAttachedToRoot {
        /// The fiber the walk started from.
        source_fiber: FiberId,
        /// The parentless fiber the walk ended on.
        top: FiberId,
    },

    /// The same root kept receiving synchronous updates during commit.
    #[error(
        "Maximum update depth exceeded ({limit} nested updates). This can happen when a \
         component repeatedly schedules an update while committing"
    )]
    MaximumUpdateDepthExceeded {
        /// The configured nested update limit.
        limit: u32,
    },

    /// Render-phase updates forced too many consecutive re-renders.
    #[error("Too many re-renders ({limit}). Render-phase updates are looping")]
    TooManyReRenders {
        /// The configured re-render limit.
        limit: u32,
    },

    /// `read_context` was called with no fiber being rendered.
    #[error("Context can only be read while a component is rendering")]
    ContextReadOutsideRender,

    /// A context provider in the work-in-progress tree has no current twin.
    #[error("Provider fiber {0:?} should have a current fiber")]
    MissingCurrentFiber(FiberId),

    /// An async action was entangled outside of a tokio runtime.
    #[error("Async actions require a running tokio runtime")]
    NoAsyncRuntime,
}

/// Errors raised while loading a [`ReconcilerConfig`](crate::config::ReconcilerConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The input was not valid JSON for the config schema.
    #[error("Invalid reconciler config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A limit was configured as zero.
    #[error("Config value `{field}` must be greater than zero")]
    ZeroLimit {
        /// The offending field.
        field: &'static str,
    },
}

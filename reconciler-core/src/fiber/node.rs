//! Fiber Nodes
//!
//! This module defines the node type that lives in the fiber arena.
//!
//! A fiber is one component in one render attempt. Every mounted component
//! has up to two fibers: the `current` one reflecting committed state and a
//! `work-in-progress` twin, linked through `alternate`.

use bitflags::bitflags;
use smallvec::SmallVec;

use super::update::QueueId;
use crate::context::{ContextId, ContextValue};
use crate::lane::{Lanes, NO_LANES};

/// Index of a fiber in its [`FiberTree`](super::FiberTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u32);

impl FiberId {
    /// Get the raw arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for FiberId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Index of a root in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(pub(crate) u32);

/// Index of an offscreen boundary instance, shared by both twins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffscreenId(pub(crate) u32);

/// What kind of component a fiber represents.
///
/// Propagation and update routing dispatch on this with an explicit match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkTag {
    /// The sentinel at the top of every tree.
    HostRoot,
    FunctionComponent,
    ClassComponent,
    HostComponent,
    HostText,
    Fragment,
    /// Provides a new value for a context to its subtree.
    ContextProvider(ContextId),
    /// A host component whose form-action state is exposed as a context.
    HostTransitionProvider,
    /// A boundary that owns a memoization cache.
    CacheComponent,
    SuspenseComponent,
    /// A server-rendered subtree that has not been hydrated yet.
    DehydratedFragment,
    /// A subtree that can be hidden without being unmounted.
    Offscreen,
}

bitflags! {
    /// Per-fiber marker bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FiberFlags: u32 {
        /// Inserted by the render in progress, not yet committed.
        const PLACEMENT = 1 << 0;
        /// Context changes above this fiber were already pushed down.
        const DID_PROPAGATE_CONTEXT = 1 << 1;
        /// This fiber read a context during its last render, so the
        /// propagation shortcut cannot be trusted inside it.
        const NEEDS_PROPAGATION = 1 << 2;
        /// Removed from the tree. Updates to it are dropped.
        const DETACHED = 1 << 3;
    }
}

bitflags! {
    /// Rendering mode inherited from the root.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FiberMode: u8 {
        /// Updates are scheduled by priority rather than synchronously.
        const CONCURRENT = 1 << 0;
    }
}

/// Instance data shared by a fiber and its alternate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateNode {
    Root(RootId),
    Offscreen(OffscreenId),
}

/// One context read by a fiber, with the value seen at read time.
#[derive(Debug, Clone)]
pub struct ContextDependency {
    pub context: ContextId,
    pub memoized_value: ContextValue,
}

/// The contexts a fiber subscribed to during its last render.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    /// Lanes on which a context change reached this fiber and has not been
    /// rendered yet.
    pub lanes: Lanes,
    pub contexts: SmallVec<[ContextDependency; 2]>,
}

impl Dependencies {
    pub fn reads(&self, context: ContextId) -> bool {
        self.contexts.iter().any(|dep| dep.context == context)
    }
}

/// A node in the fiber tree.
#[derive(Debug, Clone)]
pub struct Fiber {
    pub(crate) id: FiberId,
    pub(crate) tag: WorkTag,
    pub(crate) mode: FiberMode,
    pub(crate) flags: FiberFlags,

    /// Lanes of updates scheduled on this fiber itself.
    pub(crate) lanes: Lanes,
    /// Union of pending lanes anywhere below this fiber.
    pub(crate) child_lanes: Lanes,

    /// Parent. A back link: the parent owns this fiber, not the reverse.
    pub(crate) return_: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) alternate: Option<FiberId>,

    pub(crate) dependencies: Option<Dependencies>,

    /// For providers, the `value` prop of the render in progress.
    pub(crate) pending_props: Option<ContextValue>,
    /// For providers, the `value` prop of the last completed render.
    pub(crate) memoized_props: Option<ContextValue>,
    /// For host transition providers, the form status.
    pub(crate) memoized_state: Option<ContextValue>,

    pub(crate) update_queue: Option<QueueId>,
    pub(crate) state_node: Option<StateNode>,
}

impl Fiber {
    pub(crate) fn new(id: FiberId, tag: WorkTag, mode: FiberMode) -> Self {
        Self {
            id,
            tag,
            mode,
            flags: FiberFlags::empty(),
            lanes: NO_LANES,
            child_lanes: NO_LANES,
            return_: None,
            child: None,
            sibling: None,
            alternate: None,
            dependencies: None,
            pending_props: None,
            memoized_props: None,
            memoized_state: None,
            update_queue: None,
            state_node: None,
        }
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn tag(&self) -> WorkTag {
        self.tag
    }

    pub fn mode(&self) -> FiberMode {
        self.mode
    }

    pub fn flags(&self) -> FiberFlags {
        self.flags
    }

    pub fn lanes(&self) -> Lanes {
        self.lanes
    }

    pub fn child_lanes(&self) -> Lanes {
        self.child_lanes
    }

    pub fn parent(&self) -> Option<FiberId> {
        self.return_
    }

    pub fn child(&self) -> Option<FiberId> {
        self.child
    }

    pub fn sibling(&self) -> Option<FiberId> {
        self.sibling
    }

    pub fn alternate(&self) -> Option<FiberId> {
        self.alternate
    }

    pub fn dependencies(&self) -> Option<&Dependencies> {
        self.dependencies.as_ref()
    }

    pub fn update_queue(&self) -> Option<QueueId> {
        self.update_queue
    }

    pub fn state_node(&self) -> Option<StateNode> {
        self.state_node
    }

    pub fn is_concurrent(&self) -> bool {
        self.mode.contains(FiberMode::CONCURRENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::SYNC_LANE;

    #[test]
    fn new_fiber_has_no_pending_work() {
        let fiber = Fiber::new(FiberId::from(0), WorkTag::FunctionComponent, FiberMode::CONCURRENT);
        assert_eq!(fiber.lanes(), NO_LANES);
        assert_eq!(fiber.child_lanes(), NO_LANES);
        assert!(fiber.flags().is_empty());
        assert!(fiber.is_concurrent());
        assert!(fiber.parent().is_none());
    }

    #[test]
    fn dependencies_report_reads() {
        let ctx = ContextId::from(4);
        let mut deps = Dependencies {
            lanes: SYNC_LANE,
            ..Dependencies::default()
        };
        assert!(!deps.reads(ctx));

        deps.contexts.push(ContextDependency {
            context: ctx,
            memoized_value: ContextValue::new(1),
        });
        assert!(deps.reads(ctx));
    }
}

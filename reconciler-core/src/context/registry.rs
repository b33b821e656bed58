//! Context Registry and Provider Stack
//!
//! Contexts are shared between renderers: two renderer instances in one
//! process read the same context objects. Each context therefore keeps two
//! current values, one per [`RendererSlot`], so that a primary and a
//! secondary renderer can both be mid-render without clobbering each other.
//!
//! The current value is the single source of truth consumers read. Entering
//! a provider pushes the previous value onto a cursor and installs the new
//! one; leaving it restores the saved value.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};
use crate::fiber::{ContextDependency, Dependencies, FiberFlags, FiberId, FiberTree};
use crate::lane::{Lanes, NO_LANES};
use crate::stack::StackCursor;

/// Identifier of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

impl From<u32> for ContextId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Context exposing the status of the nearest pending form action.
pub const HOST_TRANSITION_CONTEXT: ContextId = ContextId(0);

/// Context carrying the active [`Cache`](crate::cache::Cache).
pub const CACHE_CONTEXT: ContextId = ContextId(1);

/// A context value. Compared by identity, never structurally: two values are
/// the same only if they are clones of one another.
#[derive(Clone)]
pub struct ContextValue(Arc<dyn Any + Send + Sync>);

impl ContextValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    /// A value carrying nothing.
    pub fn unit() -> Self {
        Self::new(())
    }

    /// Same-value check.
    pub fn same_value(&self, other: &ContextValue) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextValue({:p})", Arc::as_ptr(&self.0))
    }
}

/// Which of a context's two current-value slots a renderer owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererSlot {
    Primary,
    Secondary,
}

impl RendererSlot {
    fn index(self) -> usize {
        match self {
            RendererSlot::Primary => 0,
            RendererSlot::Secondary => 1,
        }
    }
}

#[derive(Debug)]
struct ContextSlot {
    name: String,
    default_value: ContextValue,
    current: [ContextValue; 2],
}

/// The set of contexts known to a process. Cloning shares the registry.
#[derive(Debug, Clone)]
pub struct ContextRegistry {
    contexts: Arc<RwLock<Vec<ContextSlot>>>,
}

impl ContextRegistry {
    /// Create a registry holding the built-in contexts.
    pub fn new() -> Self {
        let registry = Self {
            contexts: Arc::new(RwLock::new(Vec::new())),
        };
        registry.create_context("HostTransition", ContextValue::unit());
        registry.create_context("Cache", ContextValue::unit());
        registry
    }

    /// Register a context with its default value.
    pub fn create_context(&self, name: impl Into<String>, default_value: ContextValue) -> ContextId {
        let mut contexts = self.contexts.write();
        let id = ContextId(contexts.len() as u32);
        contexts.push(ContextSlot {
            name: name.into(),
            current: [default_value.clone(), default_value.clone()],
            default_value,
        });
        id
    }

    pub fn name(&self, id: ContextId) -> Option<String> {
        self.contexts.read().get(id.0 as usize).map(|slot| slot.name.clone())
    }

    pub fn default_value(&self, id: ContextId) -> Option<ContextValue> {
        self.contexts
            .read()
            .get(id.0 as usize)
            .map(|slot| slot.default_value.clone())
    }

    /// The value a consumer rendered by `slot` reads right now.
    pub fn current_value(&self, id: ContextId, slot: RendererSlot) -> Option<ContextValue> {
        self.contexts
            .read()
            .get(id.0 as usize)
            .map(|context| context.current[slot.index()].clone())
    }

    fn replace_current(
        &self,
        id: ContextId,
        slot: RendererSlot,
        value: ContextValue,
    ) -> Option<ContextValue> {
        let mut contexts = self.contexts.write();
        let context = contexts.get_mut(id.0 as usize)?;
        Some(std::mem::replace(&mut context.current[slot.index()], value))
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A saved provider frame.
#[derive(Debug, Clone)]
pub struct ProviderFrame {
    pub context: ContextId,
    pub previous: ContextValue,
    pub owner: FiberId,
}

/// One renderer's view of the contexts: the provider stack plus the state
/// of the context reads of the fiber being rendered.
#[derive(Debug)]
pub struct ContextEngine {
    pub(super) registry: ContextRegistry,
    pub(super) slot: RendererSlot,
    cursor: StackCursor<Option<ProviderFrame>>,
    currently_rendering: Option<FiberId>,
    has_read_context: bool,
}

impl ContextEngine {
    pub fn new(registry: ContextRegistry, slot: RendererSlot) -> Self {
        Self {
            registry,
            slot,
            cursor: StackCursor::new(None),
            currently_rendering: None,
            has_read_context: false,
        }
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn slot(&self) -> RendererSlot {
        self.slot
    }

    /// Number of providers currently entered.
    pub fn depth(&self) -> usize {
        self.cursor.depth()
    }

    /// Enter a provider: save the context's value and install `value`.
    pub fn push_provider(&mut self, fiber: FiberId, context: ContextId, value: ContextValue) {
        let previous = self
            .registry
            .replace_current(context, self.slot, value)
            .unwrap_or_else(ContextValue::unit);
        self.cursor.push(
            Some(ProviderFrame {
                context,
                previous,
                owner: fiber,
            }),
            fiber,
        );
    }

    /// Leave a provider and restore the value it replaced.
    pub fn pop_provider(&mut self, fiber: FiberId, context: ContextId) -> Result<()> {
        let frame = self
            .cursor
            .pop(fiber)?
            .ok_or(ReconcileError::StackUnderflow { fiber })?;
        if frame.context != context {
            return Err(ReconcileError::ProviderMismatch {
                expected: context,
                found: frame.context,
            });
        }
        self.registry.replace_current(context, self.slot, frame.previous);
        Ok(())
    }

    /// Start rendering `fiber`: its previous context reads are discarded and
    /// will be rebuilt by [`read_context`](Self::read_context).
    ///
    /// Returns true if a context change was propagated to the fiber on one
    /// of `render_lanes`. Such a fiber must re-render even when its props
    /// are unchanged.
    pub fn prepare_to_read_context(
        &mut self,
        tree: &mut FiberTree,
        fiber: FiberId,
        render_lanes: Lanes,
    ) -> bool {
        self.currently_rendering = Some(fiber);
        self.has_read_context = false;
        let Some(deps) = tree[fiber].dependencies.as_mut() else {
            return false;
        };
        let received_update = deps.lanes.includes_some(render_lanes);
        deps.lanes = NO_LANES;
        deps.contexts.clear();
        received_update
    }

    /// Read a context from the fiber being rendered, subscribing it to
    /// changes of that context.
    pub fn read_context(&mut self, tree: &mut FiberTree, context: ContextId) -> Result<ContextValue> {
        let consumer = self
            .currently_rendering
            .ok_or(ReconcileError::ContextReadOutsideRender)?;
        let value = self
            .registry
            .current_value(context, self.slot)
            .unwrap_or_else(ContextValue::unit);
        let dependency = ContextDependency {
            context,
            memoized_value: value.clone(),
        };

        let fiber = &mut tree[consumer];
        if !self.has_read_context {
            self.has_read_context = true;
            let mut deps = Dependencies::default();
            deps.contexts.push(dependency);
            fiber.dependencies = Some(deps);
            fiber.flags |= FiberFlags::NEEDS_PROPAGATION;
        } else if let Some(deps) = fiber.dependencies.as_mut() {
            deps.contexts.push(dependency);
        }
        Ok(value)
    }

    /// Finish rendering the current fiber.
    pub fn reset_context_dependencies(&mut self) {
        self.currently_rendering = None;
        self.has_read_context = false;
    }

    /// Throw away every pushed provider, restoring the values they replaced.
    /// Used when a render is abandoned midway.
    pub fn unwind_all(&mut self) {
        while let Some(frame) = self.cursor.current().clone() {
            self.registry
                .replace_current(frame.context, self.slot, frame.previous);
            if self.cursor.pop(frame.owner).is_err() {
                break;
            }
        }
        self.cursor.reset(None);
        self.reset_context_dependencies();
    }
}

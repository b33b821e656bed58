//! Context Propagation Engine
//!
//! Contexts pass values down the tree without threading them through every
//! component. This module owns the values (per renderer slot), the provider
//! stack, the record of which fibers read which contexts, and the algorithm
//! that finds stale consumers when a provider's value changes.
//!
//! # Implementation Notes
//!
//! Values are compared by identity, not structurally. Providing a freshly
//! built value with equal contents still counts as a change.

mod propagation;
mod registry;

pub use propagation::{
    lazily_propagate_parent_context_changes, propagate_context_change,
    propagate_context_changes, propagate_parent_context_changes_to_deferred_tree,
    schedule_context_work_on_parent_path,
};
pub use registry::{
    ContextEngine, ContextId, ContextRegistry, ContextValue, ProviderFrame, RendererSlot,
    CACHE_CONTEXT, HOST_TRANSITION_CONTEXT,
};

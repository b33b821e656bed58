//! Async Actions
//!
//! Entanglement of concurrently pending async actions into one scope, and
//! the default transition indicator shown while such a scope is pending.
//!
//! # Lifecycle
//!
//! 1. The first `entangle` call opens a scope and takes a transition lane.
//! 2. Later calls join it and share the lane.
//! 3. Each action pings the scope when it settles, resolved or rejected.
//! 4. The last ping hides the indicator and fires the scope's listeners in
//!    the order they were registered.

mod entangle;
mod indicator;
mod thenable;

pub use entangle::{ActionEntangler, IndicatorRetainer};
pub use indicator::{IndicatorCallback, IndicatorCleanup};
pub use thenable::{chain_thenable_value, ActionListener, ChainedValue, EntangledThenable, ThenableStatus};

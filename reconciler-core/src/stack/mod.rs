//! Cursor Stacks
//!
//! Generic push/pop value stacks used while traversing the tree. Context
//! providers and host components push values on entry and pop them on
//! completion, so a cursor's current value is always the one that applies to
//! the fiber being rendered.

mod cursor;
mod host_context;

pub use cursor::StackCursor;
pub use host_context::{HostContextProvider, HostContextStack};

//! Host Context
//!
//! Tracks the host container and host context (for example an XML namespace)
//! while rendering. Each host component may derive a new context from its
//! parent's; the stack only records a frame when the context actually
//! changes.

use super::cursor::StackCursor;
use crate::error::{ReconcileError, Result};
use crate::fiber::FiberId;

/// The renderer-specific part of host context handling.
pub trait HostContextProvider {
    /// The object host components are mounted into.
    type Container: Clone;
    /// Context passed down from host parents to host children.
    type Context: Clone + PartialEq;

    /// Context for the top of a container.
    fn root_context(&self, container: &Self::Container) -> Self::Context;

    /// Context for a child of a host component of type `kind`.
    fn child_context(&self, parent: &Self::Context, kind: &str) -> Self::Context;
}

/// Cursors for host containers and contexts.
pub struct HostContextStack<P: HostContextProvider> {
    provider: P,
    root_instance: StackCursor<Option<P::Container>>,
    context: StackCursor<Option<P::Context>>,
    context_fiber: StackCursor<Option<FiberId>>,
}

impl<P: HostContextProvider> HostContextStack<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            root_instance: StackCursor::new(None),
            context: StackCursor::new(None),
            context_fiber: StackCursor::new(None),
        }
    }

    /// Enter a host root or portal.
    pub fn push_host_container(&mut self, fiber: FiberId, container: P::Container) {
        let root_context = self.provider.root_context(&container);
        self.root_instance.push(Some(container), fiber);
        self.context_fiber.push(Some(fiber), fiber);
        self.context.push(Some(root_context), fiber);
    }

    pub fn pop_host_container(&mut self, fiber: FiberId) -> Result<()> {
        self.context.pop(fiber)?;
        self.context_fiber.pop(fiber)?;
        self.root_instance.pop(fiber)?;
        Ok(())
    }

    /// Enter a host component of type `kind`.
    pub fn push_host_context(&mut self, fiber: FiberId, kind: &str) -> Result<()> {
        let parent = self
            .context
            .current()
            .clone()
            .ok_or(ReconcileError::StackUnderflow { fiber })?;
        let next = self.provider.child_context(&parent, kind);
        if next == parent {
            return Ok(());
        }
        self.context_fiber.push(Some(fiber), fiber);
        self.context.push(Some(next), fiber);
        Ok(())
    }

    /// Leave a host component. A no-op if it did not push a new context.
    pub fn pop_host_context(&mut self, fiber: FiberId) -> Result<()> {
        if *self.context_fiber.current() != Some(fiber) {
            return Ok(());
        }
        self.context.pop(fiber)?;
        self.context_fiber.pop(fiber)?;
        Ok(())
    }

    pub fn root_host_container(&self) -> Option<&P::Container> {
        self.root_instance.current().as_ref()
    }

    pub fn host_context(&self) -> Option<&P::Context> {
        self.context.current().as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Namespace {
        Html,
        Svg,
    }

    struct Namespaces;

    impl HostContextProvider for Namespaces {
        type Container = &'static str;
        type Context = Namespace;

        fn root_context(&self, _container: &&'static str) -> Namespace {
            Namespace::Html
        }

        fn child_context(&self, parent: &Namespace, kind: &str) -> Namespace {
            match (parent, kind) {
                (Namespace::Html, "svg") => Namespace::Svg,
                (Namespace::Svg, "foreignObject") => Namespace::Html,
                (ns, _) => *ns,
            }
        }
    }

    #[test]
    fn context_changes_only_push_when_different() {
        let root = FiberId::from(0);
        let div = FiberId::from(1);
        let svg = FiberId::from(2);

        let mut stack = HostContextStack::new(Namespaces);
        stack.push_host_container(root, "#app");
        assert_eq!(stack.root_host_container(), Some(&"#app"));
        assert_eq!(stack.host_context(), Some(&Namespace::Html));

        stack.push_host_context(div, "div").unwrap();
        stack.push_host_context(svg, "svg").unwrap();
        assert_eq!(stack.host_context(), Some(&Namespace::Svg));

        stack.pop_host_context(svg).unwrap();
        assert_eq!(stack.host_context(), Some(&Namespace::Html));
        // `div` never pushed, so popping it leaves the root context alone.
        stack.pop_host_context(div).unwrap();
        assert_eq!(stack.host_context(), Some(&Namespace::Html));

        stack.pop_host_container(root).unwrap();
        assert_eq!(stack.host_context(), None);
        assert_eq!(stack.root_host_container(), None);
    }

    #[test]
    fn host_context_without_container_fails() {
        let mut stack = HostContextStack::new(Namespaces);
        assert!(stack.push_host_context(FiberId::from(3), "div").is_err());
    }
}

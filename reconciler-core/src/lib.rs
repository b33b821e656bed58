//! Reconciler Core
//!
//! This crate provides the concurrency coordination core of the Lattice
//! reconciler. It implements:
//!
//! - The lane priority model (31-bit lane sets and lane selection)
//! - Staging of updates scheduled while a render is paused
//! - Upward lane propagation through the fiber tree
//! - Context change propagation, lazy and forced
//! - Refcounted caches with deferred abort
//! - Entanglement of concurrently pending async actions
//!
//! It does not render components, diff children or talk to a host. A work
//! loop drives it through [`runtime::Reconciler`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `lane`: lane sets, lane selection and per-root lane bookkeeping
//! - `fiber`: the arena-backed double-buffered fiber tree and update queues
//! - `stack`: fiber-owned stack cursors and the host context stack
//! - `context`: context providers, reads and change propagation
//! - `concurrent`: the update staging buffer and re-entrancy guards
//! - `cache`: refcounted caches and the per-root cache pool
//! - `action`: async action scopes and the default transition indicator
//! - `scheduler`: the injected task scheduler capability
//! - `runtime`: the reconciler that ties these together
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use reconciler_core::config::ReconcilerConfig;
//! use reconciler_core::fiber::{FiberMode, WorkTag};
//! use reconciler_core::lane::{DEFAULT_LANE, NO_LANES};
//! use reconciler_core::runtime::Reconciler;
//! use reconciler_core::scheduler::ManualScheduler;
//!
//! let scheduler = ManualScheduler::new();
//! let mut reconciler =
//!     Reconciler::new(ReconcilerConfig::default(), Arc::new(scheduler.clone())).unwrap();
//!
//! // Mount a root with one component that owns a state queue
//! let tree = reconciler.tree_mut();
//! let (root, host) = tree.create_root(FiberMode::CONCURRENT);
//! let counter = tree.create_child(host, WorkTag::FunctionComponent);
//! let queue = tree.create_queue(counter);
//!
//! // An event handler schedules an update; it is staged, not applied
//! let dispatched = reconciler.dispatch_update(counter, queue, Arc::new(1u32)).unwrap();
//! assert_eq!(dispatched.lane, DEFAULT_LANE);
//!
//! // The work loop starts a render, which flushes the staging buffer
//! let lanes = reconciler.prepare_fresh_stack(root).unwrap();
//! assert_eq!(lanes, DEFAULT_LANE);
//! assert_eq!(reconciler.tree().pending_updates(queue), vec![dispatched.update]);
//!
//! // ...and commits once the work is done
//! reconciler.commit_root(root, NO_LANES).unwrap();
//! assert!(reconciler.tree().root(root).pending_lanes().is_empty());
//! ```

pub mod action;
pub mod cache;
pub mod concurrent;
pub mod config;
pub mod context;
pub mod error;
pub mod fiber;
pub mod lane;
pub mod runtime;
pub mod scheduler;
pub mod stack;

pub use error::{ConfigError, ReconcileError, Result};
pub use runtime::Reconciler;

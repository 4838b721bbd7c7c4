//! Trellis Core Runtime
//!
//! Foundational primitives for the Trellis metadata compiler:
//!
//! - **Reactive Signals**: push-based invalidation, pull-based recomputation,
//!   automatic dependency tracking
//! - **Untracked Scopes**: dependency-suppressed execution for installs driven
//!   from inside another reactive computation
//! - **Deferred Scheduler**: cooperative single-threaded task queue standing in
//!   for the host event loop
//!
//! # Example
//!
//! ```rust
//! use trellis_core::reactive::ReactiveGraph;
//!
//! let mut graph = ReactiveGraph::new();
//! let count = graph.create_signal(0i32);
//! let doubled = graph.create_derived(move |g| g.get(count).unwrap_or(0) * 2);
//!
//! graph.set(count, 5);
//! assert_eq!(graph.get_derived(doubled), Some(10));
//! ```

pub mod reactive;
pub mod scheduler;

pub use reactive::{
    shared_graph, Derived, DerivedId, Effect, EffectId, ReactiveGraph, SharedGraph, Signal,
    SignalId, SubscriberId,
};
pub use scheduler::{Scheduler, SharedScheduler};

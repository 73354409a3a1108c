//! An opinionated work-stealing task-graph scheduler.
//!
//! - A [`Graph`] is a reference-counted DAG of task nodes.
//!   Nodes come in four kinds ([`NodeKind`]):
//!   plain functions, dynamic nodes that rebuild an owned sub-graph each run,
//!   switch nodes that pick exactly one forward branch,
//!   and nested whole-graph nodes.
//! - A [`Scheduler`] owns a fixed pool of worker threads,
//!   each with a bounded lock-free MPMC queue.
//!   Tasks are dispatched round-robin; workers steal from peers when their own
//!   queue runs dry and park on their state atomic when the whole pool is empty.
//! - Completion is pure join-count arithmetic.
//!   Every finished node contributes ticks to its root graph;
//!   switch nodes charge their not-taken branches up front,
//!   so the graph terminates without ever traversing skipped subtrees.
//! - Notify callbacks are routed through a separate queue and run by whichever
//!   thread pumps [`Scheduler::process_notifications`],
//!   letting a single-threaded UI loop collect completions.

#![deny(
    anonymous_parameters,
    bare_trait_objects,
    clippy::clone_on_ref_ptr,
    clippy::float_cmp_const,
    clippy::if_not_else,
    clippy::unwrap_used
)]
#![cfg_attr(any(doc, not(debug_assertions)), deny(missing_docs))]

pub mod graph;
#[doc(inline)]
pub use graph::Graph;

pub mod node;
#[doc(inline)]
pub use node::{IntoWork, NodeKind, Work};

pub mod scheduler;
#[doc(inline)]
pub use scheduler::Scheduler;

pub mod task;
#[doc(inline)]
pub use task::Task;

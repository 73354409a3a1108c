//! Task handles, the user-facing node builder API.

use std::fmt;
use std::ptr::NonNull;

use crate::node::{IntoWork, Node, NodeKind};

/// A lightweight handle to one node of a [`Graph`](crate::Graph).
///
/// Copying a task copies the reference, not the node; two tasks compare equal
/// iff they refer to the same node. The handle carries no lifetime: like the
/// node links themselves, it is valid exactly as long as the owning graph.
///
/// Builder calls (`set_work`, `set_notify`, `set_name`, `precede`, `succeed`)
/// must only run from a single thread while the owning graph is not running.
#[derive(Clone, Copy)]
pub struct Task {
    node: NonNull<Node>,
}

// A task is a pointer into a graph whose nodes follow the dispatch
// discipline described on `Node`.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    pub(crate) fn new(node: NonNull<Node>) -> Self { Self { node } }

    pub(crate) fn node(&self) -> &Node { unsafe { self.node.as_ref() } }

    pub(crate) fn node_ptr(&self) -> NonNull<Node> { self.node }

    /// The kind of work the node currently carries.
    pub fn kind(&self) -> NodeKind { self.node().kind() }

    /// Replaces the node's work, reclassifying its kind from the new
    /// signature (see [`IntoWork`]).
    ///
    /// Replacing work does not recompute switch join counts; a graph whose
    /// switches changed shape must go through another `emplace` or be rebuilt
    /// before scheduling.
    pub fn set_work<M>(&self, work: impl IntoWork<M>) {
        unsafe { *self.node().work_mut() = work.into_work().0 }
    }

    /// Attaches a notify callback, delivered through the scheduler's
    /// notification queue and run by whichever thread pumps
    /// [`Scheduler::process_notifications`](crate::Scheduler::process_notifications).
    pub fn set_notify(&self, notify: impl FnMut() + Send + 'static) {
        unsafe { *self.node().notify_mut() = Some(Box::new(notify)) }
    }

    /// Whether a notify callback is attached.
    pub fn has_notify(&self) -> bool { self.node().has_notify() }

    /// Names the node; the name labels task failures in the log.
    pub fn set_name(&self, name: &str) { unsafe { self.node().set_name(name) } }

    /// The node's name; empty if never set.
    pub fn name(&self) -> &str { self.node().name() }

    /// Marks or clears bypass: a bypassed node skips its work as if it ran
    /// silently, but its successors are still scheduled. Bypassing a switch
    /// node is a contract violation reported at dispatch.
    pub fn set_bypass(&self, bypass: bool) { self.node().set_bypass(bypass) }

    /// Whether the node is bypassed.
    pub fn bypass(&self) -> bool { self.node().bypass() }

    /// Links `next` after this task: `next` becomes runnable once every task
    /// preceding it has completed.
    pub fn precede(&self, next: Task) {
        unsafe {
            self.node().linked_to_mut().push(next.node_ptr());
            next.node().linked_from_mut().push(self.node_ptr());
        }
    }

    /// Links `prev` before this task.
    pub fn succeed(&self, prev: Task) { prev.precede(*self) }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool { self.node == other.node }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Task: Send, Sync);

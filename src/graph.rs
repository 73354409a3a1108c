//! Graph containers and their run state.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use indexmap::IndexSet;

use crate::node::{IntoWork, Node, NodeKind, WorkData};
use crate::scheduler::Shared;
use crate::task::Task;


/// Predicate evaluated when a graph finishes; returning `true` immediately
/// reruns the graph without rescheduling it from outside.
pub type RepeatFn = Box<dyn FnMut() -> bool + Send>;

/// A shared, reference-counted DAG of task nodes.
///
/// Cloning the handle shares the same underlying graph. The node set is
/// released when the last handle drops; if the graph is still running at that
/// point, the releasing thread blocks until the run completes.
///
/// While the graph is running, its node set and link structure are immutable:
/// [`emplace`](Self::emplace), [`clear`](Self::clear),
/// [`clear_links`](Self::clear_links),
/// [`set_repeat_callback`](Self::set_repeat_callback) and the
/// [`Task`] builder calls must only run from a single thread while
/// [`running`](Self::running) is false.
#[derive(Clone, Default)]
pub struct Graph {
    data: Arc<GraphData>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self { Self::default() }

    /// Adds a node running `work`, classified from its signature
    /// (see [`IntoWork`]), and returns the task handle used to link and
    /// configure it. Invalidates the preprocessed state.
    ///
    /// # Panics
    /// Panics if the graph is running.
    pub fn emplace<M>(&mut self, work: impl IntoWork<M>) -> Task {
        assert!(!self.running(), "cannot emplace into a running graph");
        let node = Box::new(Node::new(work.into_work().0, Arc::as_ptr(&self.data)));
        let ptr = NonNull::from(&*node);
        // build contract: single thread, not running
        unsafe { self.data.children_mut().push(node) };
        self.data.preprocessed.store(false, Ordering::SeqCst);
        Task::new(ptr)
    }

    /// Sets the repeat predicate, evaluated each time the graph finishes.
    ///
    /// # Panics
    /// Panics if the graph is running.
    pub fn set_repeat_callback(&mut self, repeat: impl FnMut() -> bool + Send + 'static) {
        assert!(!self.running(), "cannot set the repeat callback of a running graph");
        unsafe { *self.data.repeat_mut() = Some(Box::new(repeat)) };
    }

    /// Whether a repeat predicate is set.
    pub fn has_repeat_callback(&self) -> bool { self.data.has_repeat_callback() }

    /// Whether the graph is currently scheduled and incomplete.
    pub fn running(&self) -> bool { self.data.running() }

    /// Spin-yields until the current run completes. Returns immediately if
    /// the graph is not running.
    ///
    /// # Panics
    /// Panics if a repeat callback is set: a repeating graph has no terminal
    /// state to wait for.
    pub fn wait(&self) {
        assert!(!self.has_repeat_callback(), "waiting on a repeating graph would never return");
        while self.running() {
            thread::yield_now();
        }
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        // reads are safe against the build contract; the set is frozen while running
        unsafe { self.data.children() }.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Iterates over the graph's nodes as task handles.
    pub fn tasks(&self) -> impl Iterator<Item = Task> + '_ {
        unsafe { self.data.children() }.iter().map(|node| Task::new(NonNull::from(&**node)))
    }

    /// Drops every node; links die with them.
    ///
    /// # Panics
    /// Panics if the graph is running.
    pub fn clear(&mut self) {
        assert!(!self.running(), "cannot clear a running graph");
        unsafe { self.data.children_mut().clear() };
        self.data.preprocessed.store(false, Ordering::SeqCst);
    }

    /// Removes every link, keeping the nodes alive.
    ///
    /// # Panics
    /// Panics if the graph is running.
    pub fn clear_links(&mut self) {
        assert!(!self.running(), "cannot clear the links of a running graph");
        for node in unsafe { self.data.children() } {
            unsafe {
                node.linked_to_mut().clear();
                node.linked_from_mut().clear();
            }
        }
        self.data.preprocessed.store(false, Ordering::SeqCst);
    }

    pub(crate) fn data(&self) -> &GraphData { &self.data }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("len", &self.len())
            .field("running", &self.running())
            .finish()
    }
}

/// The shared state behind [`Graph`] handles.
#[derive(Default)]
pub(crate) struct GraphData {
    children:     UnsafeCell<Vec<Box<Node>>>,
    /// Join ticks accumulated in the current run.
    joined:       AtomicU32,
    running:      AtomicBool,
    preprocessed: AtomicBool,
    repeat:       UnsafeCell<Option<RepeatFn>>,
}

// The cells are guarded by the run-state contract: structure is only mutated
// from one thread while `running` is false.
unsafe impl Send for GraphData {}
unsafe impl Sync for GraphData {}

impl Drop for GraphData {
    fn drop(&mut self) {
        // the releasing thread must not free nodes under a live run
        while self.running.load(Ordering::SeqCst) {
            thread::yield_now();
        }
    }
}

impl GraphData {
    pub(crate) fn running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn joined(&self) -> u32 { self.joined.load(Ordering::SeqCst) }

    pub(crate) fn has_repeat_callback(&self) -> bool {
        unsafe { (*self.repeat.get()).is_some() }
    }

    /// # Safety
    /// Caller must hold the build contract, or the graph must be running
    /// (the set is frozen) for read-only iteration.
    pub(crate) unsafe fn children(&self) -> &[Box<Node>] { &*self.children.get() }

    /// # Safety
    /// Caller must hold the single-threaded build contract (not running).
    unsafe fn children_mut(&self) -> &mut Vec<Box<Node>> { &mut *self.children.get() }

    /// # Safety
    /// Caller must hold the single-threaded build contract (not running).
    unsafe fn repeat_mut(&self) -> &mut Option<RepeatFn> { &mut *self.repeat.get() }

    pub(crate) fn children_count(&self) -> u32 {
        let len = unsafe { self.children() }.len();
        u32::try_from(len).expect("graph node count exceeds u32")
    }

    pub(crate) fn is_preprocessed(&self) -> bool { self.preprocessed.load(Ordering::SeqCst) }

    /// Computes the per-branch join counts of every switch node: one tick for
    /// the branch head plus one per node transitively reachable from it, each
    /// node counted at most once per branch. Idempotent until the node set
    /// changes.
    pub(crate) fn preprocess(&self) {
        if self.is_preprocessed() {
            return;
        }
        let mut visited = IndexSet::new();
        for node in unsafe { self.children() } {
            if node.kind() != NodeKind::Switch {
                continue;
            }
            let mut join_counts = Vec::with_capacity(node.linked_to().len());
            for &link in node.linked_to() {
                visited.clear();
                let mut count = 1_u32;
                count_sub_children(unsafe { link.as_ref() }, &mut count, &mut visited);
                join_counts.push(count);
            }
            match unsafe { node.work_mut() } {
                WorkData::Switch { join_counts: slot, .. } => *slot = join_counts,
                _ => unreachable!("kind checked above"),
            }
        }
        self.preprocessed.store(true, Ordering::SeqCst);
    }

    /// Applies a completed node's join ticks. The tick that reaches the node
    /// count resets the counter, then either reruns the graph through its
    /// repeat predicate or clears the run state.
    pub(crate) fn children_joined(&self, ticks: u32, scheduler: &Shared) {
        let count = self.children_count();
        let joined = self.joined.fetch_add(ticks, Ordering::SeqCst) + ticks;
        debug_assert!(joined <= count, "graph joined {joined} ticks for {count} nodes");
        if joined == count {
            self.joined.store(0, Ordering::SeqCst);
            if self.should_repeat() {
                scheduler.schedule_graph(self, true);
            } else {
                // last access of the run: a blocked releasing thread may free
                // the graph as soon as it observes this store
                self.set_running(false);
            }
        }
    }

    fn should_repeat(&self) -> bool {
        // exclusive: only the single tick-crossing worker gets here
        match unsafe { &mut *self.repeat.get() } {
            Some(repeat) => repeat(),
            None => false,
        }
    }
}

fn count_sub_children(node: &Node, count: &mut u32, visited: &mut IndexSet<NonNull<Node>>) {
    for &child in node.linked_to() {
        if visited.insert(child) {
            *count += 1;
            count_sub_children(unsafe { child.as_ref() }, count, visited);
        }
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Graph: Send, Sync);

//! Node records and their work variants.

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::graph::{Graph, GraphData};

/// Plain work run on a worker thread.
pub type StaticFn = Box<dyn FnMut() + Send>;

/// Switch work returning the index of the forward link to take.
pub type SwitchFn = Box<dyn FnMut() -> usize + Send>;

/// Dynamic work rebuilding the node's owned sub-graph before it runs.
pub type DynamicFn = Box<dyn FnMut(&mut Graph) + Send>;

/// Completion callback run by the thread pumping
/// [`Scheduler::process_notifications`](crate::Scheduler::process_notifications).
pub type NotifyFn = Box<dyn FnMut() + Send>;

/// The four kinds of node work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Runs a plain function, then schedules every forward link.
    Static,
    /// Rebuilds its owned sub-graph, then runs it to completion.
    Dynamic,
    /// Runs a function selecting exactly one forward branch;
    /// the not-taken branches are charged as already done.
    Switch,
    /// Runs an owned nested graph to completion, then schedules every
    /// forward link.
    Graph,
}

/// A classified work payload, accepted by [`Graph::emplace`] and
/// [`Task::set_work`](crate::Task::set_work).
///
/// Values are produced through [`IntoWork`]; the payload itself is opaque.
pub struct Work(pub(crate) WorkData);

pub(crate) enum WorkData {
    Static(StaticFn),
    Dynamic { func: DynamicFn, sub: Graph },
    Switch { func: SwitchFn, join_counts: Vec<u32> },
    Graph(Graph),
}

impl WorkData {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Self::Static(_) => NodeKind::Static,
            Self::Dynamic { .. } => NodeKind::Dynamic,
            Self::Switch { .. } => NodeKind::Switch,
            Self::Graph(_) => NodeKind::Graph,
        }
    }
}

/// Classifies a value into its [`Work`] variant from its signature:
///
/// - `FnMut()` becomes a [`NodeKind::Static`] node,
/// - `FnMut() -> usize` becomes a [`NodeKind::Switch`] node,
/// - `FnMut() -> bool` becomes a two-branch [`NodeKind::Switch`] node
///   (`false` takes link 0, `true` takes link 1),
/// - `FnMut(&mut Graph)` becomes a [`NodeKind::Dynamic`] node with a fresh
///   empty sub-graph,
/// - a [`Graph`] value becomes a nested [`NodeKind::Graph`] node.
///
/// The `M` parameter only disambiguates the blanket impls; inference always
/// resolves it from the work's signature.
pub trait IntoWork<M> {
    /// Converts the value into its classified payload.
    fn into_work(self) -> Work;
}

/// Marker types resolving the [`IntoWork`] blanket impls.
pub mod marker {
    /// Selects the `FnMut()` impl.
    pub struct Static;
    /// Selects the `FnMut() -> usize` impl.
    pub struct Switch;
    /// Selects the `FnMut() -> bool` impl.
    pub struct Predicate;
    /// Selects the `FnMut(&mut Graph)` impl.
    pub struct Dynamic;
    /// Selects the [`Graph`](crate::Graph) impl.
    pub struct Nested;
}

impl<F: FnMut() + Send + 'static> IntoWork<marker::Static> for F {
    fn into_work(self) -> Work { Work(WorkData::Static(Box::new(self))) }
}

impl<F: FnMut() -> usize + Send + 'static> IntoWork<marker::Switch> for F {
    fn into_work(self) -> Work {
        Work(WorkData::Switch { func: Box::new(self), join_counts: Vec::new() })
    }
}

impl<F: FnMut() -> bool + Send + 'static> IntoWork<marker::Predicate> for F {
    fn into_work(mut self) -> Work {
        Work(WorkData::Switch {
            func:        Box::new(move || usize::from(self())),
            join_counts: Vec::new(),
        })
    }
}

impl<F: FnMut(&mut Graph) + Send + 'static> IntoWork<marker::Dynamic> for F {
    fn into_work(self) -> Work {
        Work(WorkData::Dynamic { func: Box::new(self), sub: Graph::new() })
    }
}

impl IntoWork<marker::Nested> for Graph {
    fn into_work(self) -> Work { Work(WorkData::Graph(self)) }
}

/// One unit of work in a graph.
///
/// Nodes are allocated behind a `Box` and never move afterwards; peer nodes
/// and [`Task`](crate::Task) handles refer to them by raw address. Mutable
/// fields live in `UnsafeCell` because mutation arrives through `Copy`
/// handles; exclusivity is the crate contract: one mutating thread while the
/// graph is not running, one dispatching worker per node while it is.
pub(crate) struct Node {
    work:               UnsafeCell<WorkData>,
    linked_to:          UnsafeCell<Vec<NonNull<Node>>>,
    linked_from:        UnsafeCell<Vec<NonNull<Node>>>,
    notify:             UnsafeCell<Option<NotifyFn>>,
    name:               UnsafeCell<String>,
    /// Number of predecessors that completed since the node last ran.
    pub(crate) joined:  AtomicU32,
    bypass:             AtomicBool,
    root:               *const GraphData,
}

impl Node {
    pub(crate) fn new(work: WorkData, root: *const GraphData) -> Self {
        Self {
            work: UnsafeCell::new(work),
            linked_to: UnsafeCell::new(Vec::new()),
            linked_from: UnsafeCell::new(Vec::new()),
            notify: UnsafeCell::new(None),
            name: UnsafeCell::new(String::new()),
            joined: AtomicU32::new(0),
            bypass: AtomicBool::new(false),
            root,
        }
    }

    pub(crate) fn kind(&self) -> NodeKind { unsafe { (*self.work.get()).kind() } }

    /// # Safety
    /// Caller must be the only thread dispatching or mutating this node.
    pub(crate) unsafe fn work_mut(&self) -> &mut WorkData { &mut *self.work.get() }

    pub(crate) fn linked_to(&self) -> &[NonNull<Node>] { unsafe { &*self.linked_to.get() } }

    pub(crate) fn linked_from(&self) -> &[NonNull<Node>] { unsafe { &*self.linked_from.get() } }

    /// # Safety
    /// Caller must hold the single-threaded build contract
    /// (graph not running).
    pub(crate) unsafe fn linked_to_mut(&self) -> &mut Vec<NonNull<Node>> {
        &mut *self.linked_to.get()
    }

    /// # Safety
    /// Caller must hold the single-threaded build contract
    /// (graph not running).
    pub(crate) unsafe fn linked_from_mut(&self) -> &mut Vec<NonNull<Node>> {
        &mut *self.linked_from.get()
    }

    pub(crate) fn has_notify(&self) -> bool { unsafe { (*self.notify.get()).is_some() } }

    /// # Safety
    /// Caller must be the build thread or the single notification pump.
    pub(crate) unsafe fn notify_mut(&self) -> &mut Option<NotifyFn> { &mut *self.notify.get() }

    pub(crate) fn name(&self) -> &str { unsafe { &*self.name.get() } }

    /// # Safety
    /// Caller must hold the single-threaded build contract
    /// (graph not running).
    pub(crate) unsafe fn set_name(&self, name: &str) { *self.name.get() = name.to_owned() }

    pub(crate) fn bypass(&self) -> bool { self.bypass.load(Ordering::SeqCst) }

    pub(crate) fn set_bypass(&self, bypass: bool) { self.bypass.store(bypass, Ordering::SeqCst) }

    /// The owning root graph. The graph outlives its nodes by construction.
    pub(crate) fn root(&self) -> &GraphData { unsafe { &*self.root } }
}

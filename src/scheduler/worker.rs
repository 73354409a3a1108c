use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;

use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

use super::Shared;
use crate::graph::Graph;
use crate::node::{Node, NodeKind, WorkData};
use crate::task::Task;

/// Lifecycle of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum State {
    /// Popping, stealing and dispatching tasks.
    Running  = 0,
    /// Parked after a failed pop + steal sweep.
    Idle     = 1,
    /// Told to stop; the loop exits before the next task.
    Stopping = 2,
    /// Not started, or exited.
    Stopped  = 3,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Idle,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => unreachable!("invalid worker state {value}"),
        }
    }
}

/// One worker: a bounded MPMC task queue plus the state atomic the scheduler
/// uses to park the thread and wake it on new work.
pub(crate) struct Worker {
    state:   AtomicU8,
    queue:   ArrayQueue<Task>,
    sleeper: Mutex<()>,
    wake:    Condvar,
}

impl Worker {
    pub(crate) fn new(queue_size: usize) -> Self {
        Self {
            state:   AtomicU8::new(State::Stopped as u8),
            queue:   ArrayQueue::new(queue_size),
            sleeper: Mutex::new(()),
            wake:    Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: State) { self.state.store(state as u8, Ordering::SeqCst) }

    fn transition(&self, from: State, to: State) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn start(&self) { self.set_state(State::Running) }

    /// Requests a stop, taking effect between tasks. An idle worker is woken
    /// straight into Stopping.
    pub(crate) fn stop(&self) {
        loop {
            match self.state() {
                State::Running => {
                    if self.transition(State::Running, State::Stopping) {
                        return;
                    }
                }
                State::Idle => {
                    if self.wake_into(State::Stopping) {
                        return;
                    }
                }
                State::Stopping | State::Stopped => return,
            }
        }
    }

    pub(crate) fn push(&self, task: Task) -> bool { self.queue.push(task).is_ok() }

    /// Pops from the local queue.
    pub(crate) fn pop(&self) -> Option<Task> { self.queue.pop() }

    /// A peer taking from this worker's queue; same pop, different caller.
    pub(crate) fn steal(&self) -> Option<Task> { self.queue.pop() }

    pub(crate) fn task_count(&self) -> usize { self.queue.len() }

    /// Producer-side wake, called after a successful push.
    pub(crate) fn wake_if_idle(&self) {
        if self.state() == State::Idle {
            self.wake_into(State::Running);
        }
    }

    /// Wakes the worker into `to` if it is still idle. The sleeper lock
    /// orders the transition against the park in `sleep`.
    fn wake_into(&self, to: State) -> bool {
        let _sleeper = self.sleeper.lock();
        let woken = self.transition(State::Idle, to);
        if woken {
            self.wake.notify_one();
        }
        woken
    }

    /// Parks until the state leaves Idle.
    fn sleep(&self) {
        let mut sleeper = self.sleeper.lock();
        while self.state() == State::Idle {
            self.wake.wait(&mut sleeper);
        }
    }
}

/// Body of one worker thread: pop local, steal across peers on a miss, park
/// once the whole pool looks empty.
pub(crate) fn run(shared: &Shared, index: usize) {
    let worker = &shared.workers[index];
    while worker.state() == State::Running {
        if let Some(task) = worker.pop().or_else(|| shared.steal()) {
            work(shared, worker, task);
        } else if worker.transition(State::Running, State::Idle) {
            // Re-sweep once after publishing Idle: a task pushed between the
            // failed sweep and the transition has no producer left to wake us.
            if let Some(task) = worker.pop().or_else(|| shared.steal()) {
                worker.transition(State::Idle, State::Running);
                work(shared, worker, task);
            } else {
                worker.sleep();
            }
        }
    }
    worker.set_state(State::Stopped);
}

/// Dispatches one task and applies its join ticks to the owning graph.
///
/// User work failures are caught and logged; the ticks are applied regardless
/// so the graph always terminates. Contract violations (bypassed switch,
/// out-of-range switch index, stale join counts) panic through.
fn work(shared: &Shared, worker: &Worker, task: Task) {
    let node = task.node();
    let ticks = match node.kind() {
        NodeKind::Static => dispatch_static(shared, node),
        NodeKind::Dynamic => dispatch_dynamic(shared, worker, node),
        NodeKind::Switch => dispatch_switch(shared, node),
        NodeKind::Graph => dispatch_graph(shared, worker, node),
    };
    if node.has_notify() {
        // Spin the notification into the queue, draining other tasks between
        // attempts so a full queue cannot livelock the pool. The ticks are
        // applied after acceptance: a thread returning from the graph's wait
        // observes every notification of the run already queued.
        while !shared.notify(task) && worker.state() == State::Running {
            match worker.pop().or_else(|| shared.steal()) {
                Some(other) => work(shared, worker, other),
                None => thread::yield_now(),
            }
        }
    }
    node.root().children_joined(ticks, shared);
}

fn dispatch_static(shared: &Shared, node: &Node) -> u32 {
    if !node.bypass() {
        // one dispatching worker per node: exclusive work access
        match unsafe { node.work_mut() } {
            WorkData::Static(func) => {
                catch_user(node, || func());
            }
            _ => unreachable!("dispatched as a static node"),
        }
    }
    for &link in node.linked_to() {
        schedule_node(shared, link);
    }
    1
}

fn dispatch_dynamic(shared: &Shared, worker: &Worker, node: &Node) -> u32 {
    if !node.bypass() {
        match unsafe { node.work_mut() } {
            WorkData::Dynamic { func, sub } => {
                // a failed rebuild leaves the sub-graph half-built: skip the run
                if catch_user(node, || func(&mut *sub)).is_some() {
                    blocking_graph_schedule(shared, worker, sub);
                }
            }
            _ => unreachable!("dispatched as a dynamic node"),
        }
    }
    // dynamic nodes have no static successors; the sub-graph is their body
    1
}

fn dispatch_switch(shared: &Shared, node: &Node) -> u32 {
    assert!(!node.bypass(), "switch node '{}' cannot be bypassed", node.name());
    let (func, join_counts) = match unsafe { node.work_mut() } {
        WorkData::Switch { func, join_counts } => (func, &*join_counts),
        _ => unreachable!("dispatched as a switch node"),
    };
    let links = node.linked_to();
    assert_eq!(
        join_counts.len(),
        links.len(),
        "switch node '{}' has stale join counts; the graph was mutated after preprocess",
        node.name(),
    );
    let total: u32 = join_counts.iter().sum();
    let index = match catch_user(node, || func()) {
        Some(index) => index,
        // no branch runs; charge the whole subtree so the graph terminates
        None => return 1 + total,
    };
    assert!(
        index < links.len(),
        "switch node '{}' selected branch {index} of {}",
        node.name(),
        links.len(),
    );
    schedule_node(shared, links[index]);
    // one tick for ourselves plus every node the not-taken branches owed
    1 + total - join_counts[index]
}

fn dispatch_graph(shared: &Shared, worker: &Worker, node: &Node) -> u32 {
    if !node.bypass() {
        match unsafe { node.work_mut() } {
            WorkData::Graph(nested) => blocking_graph_schedule(shared, worker, nested),
            _ => unreachable!("dispatched as a graph node"),
        }
    }
    for &link in node.linked_to() {
        schedule_node(shared, link);
    }
    1
}

/// Counts one finished predecessor into the node behind `link`; the
/// predecessor completing the set resets the counter and schedules the node.
fn schedule_node(shared: &Shared, link: NonNull<Node>) {
    // nodes outlive the run; links always point into a live graph
    let node = unsafe { link.as_ref() };
    let preds =
        u32::try_from(node.linked_from().len()).expect("node predecessor count exceeds u32");
    let joined = node.joined.fetch_add(1, Ordering::SeqCst) + 1;
    if joined == preds && preds > 0 {
        node.joined.store(0, Ordering::SeqCst);
        shared.schedule_task(Task::new(link));
    }
}

/// Schedules `graph` and cooperatively drains the pool until it completes;
/// the worker never parks here, it helps instead.
fn blocking_graph_schedule(shared: &Shared, worker: &Worker, graph: &Graph) {
    shared.schedule_graph(graph.data(), false);
    while graph.running() && worker.state() == State::Running {
        match worker.pop().or_else(|| shared.steal()) {
            Some(task) => work(shared, worker, task),
            None => thread::yield_now(),
        }
    }
}

/// Runs a user closure, logging a panic instead of unwinding the pool.
fn catch_user<R>(node: &Node, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            log::error!("task '{}' panicked: {}", node.name(), panic_message(&payload));
            None
        }
    }
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

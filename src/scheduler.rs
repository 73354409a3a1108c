//! The scheduler: worker pool ownership, dispatch and the notification pump.

use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::queue::ArrayQueue;

use crate::graph::{Graph, GraphData};
use crate::task::Task;

mod worker;
use worker::Worker;


/// Dispatches task graphs over a fixed pool of worker threads.
///
/// Dropping the scheduler stops every worker between tasks and joins the
/// threads; shutdown never interrupts user work. Graphs scheduled through a
/// scheduler must complete before it is dropped.
pub struct Scheduler {
    shared:  Arc<Shared>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Scheduler {
    /// Passed as a worker count to detect hardware concurrency.
    pub const AUTO_WORKER_COUNT: usize = 0;

    /// Worker count used when hardware detection fails.
    pub const DEFAULT_WORKER_COUNT: usize = 4;

    /// Default capacity of each worker's task queue.
    pub const DEFAULT_TASK_QUEUE_SIZE: usize = 4096;

    /// Default capacity of the notification queue.
    pub const DEFAULT_NOTIFICATION_QUEUE_SIZE: usize = 4096;

    /// Builds and starts a pool of `worker_count` threads with the default
    /// queue capacities.
    /// [`AUTO_WORKER_COUNT`](Self::AUTO_WORKER_COUNT) means hardware
    /// concurrency, falling back to
    /// [`DEFAULT_WORKER_COUNT`](Self::DEFAULT_WORKER_COUNT).
    pub fn new(worker_count: usize) -> Self {
        Self::with_queue_sizes(
            worker_count,
            Self::DEFAULT_TASK_QUEUE_SIZE,
            Self::DEFAULT_NOTIFICATION_QUEUE_SIZE,
        )
    }

    /// Builds and starts a pool with explicit queue capacities.
    ///
    /// # Panics
    /// Panics if either queue capacity is zero.
    pub fn with_queue_sizes(
        worker_count: usize,
        task_queue_size: usize,
        notification_queue_size: usize,
    ) -> Self {
        let count = match worker_count {
            Self::AUTO_WORKER_COUNT => {
                thread::available_parallelism().map_or(Self::DEFAULT_WORKER_COUNT, usize::from)
            }
            count => count,
        };
        let workers = (0..count).map(|_| Worker::new(task_queue_size)).collect();
        let shared = Arc::new(Shared {
            workers,
            last_worker_id: AtomicUsize::new(count - 1),
            notifications: ArrayQueue::new(notification_queue_size),
        });
        let threads = (0..count)
            .map(|index| {
                shared.workers[index].start();
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("workgraph worker #{index}"))
                    .spawn(move || worker::run(&shared, index))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { shared, threads }
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize { self.shared.workers.len() }

    /// Schedules a graph: preprocesses it if needed, marks it running and
    /// seeds its root nodes (those with no predecessors) across the pool.
    ///
    /// The graph completes asynchronously; wait on [`Graph::wait`], not on
    /// the scheduler. Scheduling a graph with no nodes is a no-op.
    ///
    /// # Panics
    /// Panics if the graph is already running.
    pub fn schedule(&self, graph: &Graph) { self.shared.schedule_graph(graph.data(), false) }

    /// Schedules a single task, round-robining across the worker queues.
    ///
    /// Dependencies are not consulted; this is the raw dispatch path used to
    /// seed root nodes. Scheduling a task whose predecessors have not
    /// completed breaks the graph's join arithmetic.
    pub fn schedule_task(&self, task: Task) { self.shared.schedule_task(task) }

    /// Tries to enqueue `task`'s notify callback for the pump; returns
    /// whether the notification queue accepted it.
    pub fn notify(&self, task: Task) -> bool { self.shared.notify(task) }

    /// Runs every queued notify callback on the calling thread.
    ///
    /// This is the main-thread pump: exactly one thread may pump at a time.
    /// Panicking callbacks are logged and swallowed.
    pub fn process_notifications(&self) { self.shared.process_notifications() }

    /// Spin-yields until every worker queue is empty.
    ///
    /// This drains the pool as a whole; per-graph completion is
    /// [`Graph::wait`].
    pub fn wait(&self) {
        while self.shared.workers.iter().any(|worker| worker.task_count() > 0) {
            thread::yield_now();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self { Self::new(Self::AUTO_WORKER_COUNT) }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for worker in self.shared.workers.iter() {
            worker.stop();
        }
        for thread in self.threads.drain(..) {
            thread.join().expect("worker thread panicked");
        }
    }
}

/// State shared between the public handle and the worker threads.
pub(crate) struct Shared {
    pub(crate) workers: Box<[Worker]>,
    last_worker_id:     AtomicUsize,
    notifications:      ArrayQueue<Task>,
}

impl Shared {
    /// Round-robin dispatch with skip-on-full. The `Relaxed` CAS on
    /// `last_worker_id` is a placement hint, not a fence; queue
    /// synchronization is the queue's own.
    pub(crate) fn schedule_task(&self, task: Task) {
        let count = self.workers.len();
        let mut id = self.last_worker_id.load(Ordering::Relaxed);
        loop {
            let target = (id + 1) % count;
            match self.last_worker_id.compare_exchange_weak(
                id,
                target,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let worker = &self.workers[target];
                    if worker.push(task) {
                        worker.wake_if_idle();
                        return;
                    }
                    id = self.last_worker_id.load(Ordering::Relaxed);
                }
                Err(current) => id = current,
            }
        }
    }

    /// First-fit steal sweep in worker order; concurrent stealers diverge
    /// through the queues' own synchronization.
    pub(crate) fn steal(&self) -> Option<Task> { self.workers.iter().find_map(Worker::steal) }

    pub(crate) fn notify(&self, task: Task) -> bool { self.notifications.push(task).is_ok() }

    pub(crate) fn process_notifications(&self) {
        while let Some(task) = self.notifications.pop() {
            let node = task.node();
            // exclusive: single pump thread by contract
            if let Some(notify) = unsafe { node.notify_mut() } {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| notify())) {
                    log::error!(
                        "notify callback of task '{}' panicked: {}",
                        node.name(),
                        worker::panic_message(&payload),
                    );
                }
            }
        }
    }

    /// Schedules a graph, or re-seeds it on the internal repeat path
    /// (`repeating`), which skips the run-state checks and mutations.
    pub(crate) fn schedule_graph(&self, graph: &GraphData, repeating: bool) {
        if !repeating {
            assert!(!graph.running(), "cannot schedule an already running graph");
            graph.preprocess();
            if graph.children_count() == 0 {
                // an empty graph has no node to ever pay its terminal tick
                return;
            }
            graph.set_running(true);
        }
        // the set is frozen from here until the run completes
        for node in unsafe { graph.children() } {
            if node.linked_from().is_empty() {
                self.schedule_task(Task::new(NonNull::from(&**node)));
            }
        }
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Scheduler: Send, Sync);

//! Simulation-thread task queue.
//!
//! Background engines never touch the world directly. They package the
//! effect they want as a [`DeferredTask`] and push it through a
//! [`TaskSender`]; the host drains the [`TaskQueue`] once per simulation
//! tick and runs every task against its [`Simulation`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::EngineError;
use crate::host::Simulation;
use crate::observability::metrics;

/// Effect executed on the simulation thread.
pub type Effect = Box<dyn FnOnce(&mut dyn Simulation) + Send + 'static>;

/// An effect plus its insertion sequence number.
pub struct DeferredTask {
    seq: u64,
    label: &'static str,
    effect: Effect,
}

impl DeferredTask {
    /// Insertion sequence number, unique and increasing per queue.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Short description used in diagnostics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    fn run(self, sim: &mut dyn Simulation) {
        trace!(seq = self.seq, label = self.label, "running deferred task");
        (self.effect)(sim);
    }
}

impl std::fmt::Debug for DeferredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredTask")
            .field("seq", &self.seq)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Producer half shared by engines and controllers.
///
/// The sequence counter and the channel push happen under one lock so the
/// drain order always matches sequence order, even with many producers.
#[derive(Clone)]
pub struct TaskSender {
    tx: mpsc::UnboundedSender<DeferredTask>,
    next_seq: Arc<Mutex<u64>>,
    closed: Arc<AtomicBool>,
}

impl TaskSender {
    /// Enqueues an effect for the next drain.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::QueueClosed`] once the queue has been closed.
    pub fn defer<F>(&self, label: &'static str, effect: F) -> Result<u64, EngineError>
    where
        F: FnOnce(&mut dyn Simulation) + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::QueueClosed);
        }
        let mut next = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = *next;
        self.tx
            .send(DeferredTask {
                seq,
                label,
                effect: Box::new(effect),
            })
            .map_err(|_| EngineError::QueueClosed)?;
        *next += 1;
        drop(next);
        metrics::record_task_enqueued(label);
        Ok(seq)
    }
}

impl std::fmt::Debug for TaskSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSender")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Multi-producer, single-consumer FIFO of deferred effects.
pub struct TaskQueue {
    sender: TaskSender,
    rx: Mutex<mpsc::UnboundedReceiver<DeferredTask>>,
}

impl TaskQueue {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: TaskSender {
                tx,
                next_seq: Arc::new(Mutex::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx: Mutex::new(rx),
        }
    }

    /// A producer handle for this queue.
    #[must_use]
    pub fn sender(&self) -> TaskSender {
        self.sender.clone()
    }

    /// Number of tasks waiting for the next drain.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Refuses further tasks. Tasks already queued are still drained.
    pub fn close(&self) {
        if !self.sender.closed.swap(true, Ordering::SeqCst) {
            debug!("task queue closed");
        }
    }

    /// Whether the queue refuses new tasks.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.closed.load(Ordering::SeqCst)
    }

    /// Runs the tasks that were queued when the drain began, in FIFO order.
    ///
    /// Tasks enqueued while draining (including by the drained tasks
    /// themselves) wait for the next drain, so one call never stalls the
    /// simulation thread indefinitely. Returns the number of tasks run.
    pub fn drain(&self, sim: &mut dyn Simulation) -> usize {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let budget = rx.len();
        let mut ran = 0;
        while ran < budget {
            let Ok(task) = rx.try_recv() else { break };
            task.run(sim);
            ran += 1;
        }
        let left = rx.len();
        drop(rx);
        if ran > 0 {
            trace!(ran, left, "drained task queue");
        }
        metrics::record_drain(ran, left);
        ran
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxWorld;
    use std::thread;

    #[test]
    fn drains_in_fifo_order() {
        let queue = TaskQueue::new();
        let sender = queue.sender();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            sender
                .defer("push", move |_| order.lock().unwrap().push(i))
                .unwrap();
        }
        let world = SandboxWorld::new();
        let mut host = world.host();
        assert_eq!(queue.drain(&mut host), 5);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn sequence_numbers_increase() {
        let queue = TaskQueue::new();
        let sender = queue.sender();
        let a = sender.defer("a", |_| {}).unwrap();
        let b = sender.defer("b", |_| {}).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn tasks_enqueued_during_drain_wait_for_next_drain() {
        let queue = Arc::new(TaskQueue::new());
        let sender = queue.sender();
        let inner = queue.sender();
        sender
            .defer("outer", move |_| {
                inner.defer("inner", |_| {}).unwrap();
            })
            .unwrap();
        let world = SandboxWorld::new();
        let mut host = world.host();
        assert_eq!(queue.drain(&mut host), 1);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.drain(&mut host), 1);
        assert_eq!(queue.drain(&mut host), 0);
    }

    #[test]
    fn closed_queue_rejects_but_still_drains() {
        let queue = TaskQueue::new();
        let sender = queue.sender();
        sender.defer("before", |_| {}).unwrap();
        queue.close();
        queue.close();
        assert_eq!(sender.defer("after", |_| {}), Err(EngineError::QueueClosed));
        let world = SandboxWorld::new();
        let mut host = world.host();
        assert_eq!(queue.drain(&mut host), 1);
    }

    #[test]
    fn concurrent_producers_each_task_runs_once() {
        let queue = TaskQueue::new();
        let counter = Arc::new(Mutex::new(0_u32));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sender = queue.sender();
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let counter = Arc::clone(&counter);
                        sender
                            .defer("count", move |_| *counter.lock().unwrap() += 1)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let world = SandboxWorld::new();
        let mut host = world.host();
        assert_eq!(queue.drain(&mut host), 800);
        assert_eq!(*counter.lock().unwrap(), 800);
    }

    #[test]
    fn drain_order_matches_sequence_under_contention() {
        let queue = TaskQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sender = queue.sender();
                thread::spawn(move || {
                    for _ in 0..50 {
                        sender.defer("noop", |_| {}).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut rx = queue.rx.lock().unwrap();
        while let Ok(task) = rx.try_recv() {
            seen.lock().unwrap().push(task.seq());
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 200);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}

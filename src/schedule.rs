//! Background scheduling shared by timer and watcher engines.
//!
//! A [`Worker`] owns the periodic tokio tasks of one engine run. Every tick
//! body executes while holding the worker's [`RunGate`]; stopping closes the
//! gate under the same lock, so once [`Worker::stop`] returns no further tick
//! body can start, no matter which thread called it.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Whether a tick body wants its engine to keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Schedule the next tick.
    Continue,
    /// Stop the engine after this tick.
    Finish,
}

thread_local! {
    /// Address of the gate whose body is executing on this thread, 0 if none.
    static ACTIVE_GATE: Cell<usize> = const { Cell::new(0) };
}

struct GateInner {
    open: Mutex<bool>,
    close_requested: AtomicBool,
}

/// Serializes tick bodies against shutdown.
#[derive(Clone)]
pub struct RunGate {
    inner: Arc<GateInner>,
}

impl RunGate {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                open: Mutex::new(true),
                close_requested: AtomicBool::new(false),
            }),
        }
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Runs `body` if the gate is open. Returns [`Flow::Finish`] without
    /// running it once the gate has been closed.
    pub fn pass(&self, body: impl FnOnce() -> Flow) -> Flow {
        let mut open = self.inner.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return Flow::Finish;
        }
        let previous = ACTIVE_GATE.with(|g| g.replace(self.address()));
        let flow = body();
        ACTIVE_GATE.with(|g| g.set(previous));
        if flow == Flow::Finish || self.inner.close_requested.load(Ordering::SeqCst) {
            *open = false;
            return Flow::Finish;
        }
        Flow::Continue
    }

    /// Closes the gate. Returns `true` only for the call that closed it.
    ///
    /// Called from inside one of this gate's own bodies, the close is
    /// recorded and takes effect as soon as that body returns.
    pub fn close(&self) -> bool {
        if ACTIVE_GATE.with(Cell::get) == self.address() {
            return !self.inner.close_requested.swap(true, Ordering::SeqCst);
        }
        let mut open = self.inner.open.lock().unwrap_or_else(PoisonError::into_inner);
        let was_open = *open && !self.inner.close_requested.swap(true, Ordering::SeqCst);
        *open = false;
        was_open
    }

    /// Whether tick bodies may still run.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.inner.close_requested.load(Ordering::SeqCst)
            && *self.inner.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGate")
            .field("close_requested", &self.inner.close_requested.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// The background tasks of a single engine run.
pub struct Worker {
    name: String,
    runtime: Handle,
    gate: RunGate,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Creates a worker that spawns onto `runtime`.
    #[must_use]
    pub fn new(name: impl Into<String>, runtime: Handle) -> Self {
        Self {
            name: name.into(),
            runtime,
            gate: RunGate::new(),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Engine name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns a periodic task whose first tick fires after `first`, then
    /// every `period`.
    ///
    /// A body returning [`Flow::Finish`] stops the whole worker, including
    /// its sibling tasks.
    pub fn spawn_periodic<F>(&self, first: Duration, period: Duration, mut body: F)
    where
        F: FnMut() -> Flow + Send + 'static,
    {
        let gate = self.gate.clone();
        let cancel = self.cancel.clone();
        let name = self.name.clone();
        let start = Instant::now() + first;
        let handle = self.runtime.spawn(async move {
            let mut interval = interval_at(start, period);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if gate.pass(&mut body) == Flow::Finish {
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }
            trace!(worker = %name, "periodic task exited");
        });
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Stops every task of this worker.
    ///
    /// Idempotent and callable from any thread. After it returns no tick
    /// body runs again. Returns `true` only for the call that stopped a
    /// running worker.
    pub fn stop(&self) -> bool {
        let stopped = self.gate.close();
        self.cancel.cancel();
        if stopped {
            debug!(worker = %self.name, "worker stopped");
        }
        stopped
    }

    /// Whether the worker still runs ticks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.gate.is_open() && !self.cancel.is_cancelled()
    }

    /// Waits for every spawned task to exit.
    pub async fn join(&self) {
        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Runs one tick body, turning a panic into an error message so the
/// periodic task survives it.
pub fn isolate<R>(body: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(body)).map_err(|payload| {
        payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "tick panicked".to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let worker = Worker::new("test", Handle::current());
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        worker.spawn_periodic(Duration::from_secs(1), Duration::from_secs(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        });

        tokio::time::advance(Duration::from_millis(3500)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        worker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_final() {
        let worker = Worker::new("test", Handle::current());
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        worker.spawn_periodic(Duration::from_secs(1), Duration::from_secs(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        });
        tokio::time::advance(Duration::from_millis(1500)).await;
        settle().await;

        assert!(worker.stop());
        assert!(!worker.stop());
        let seen = count.load(Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
        assert!(!worker.is_running());
        worker.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn finish_stops_sibling_tasks() {
        let worker = Worker::new("test", Handle::current());
        let sibling = Arc::new(AtomicU32::new(0));
        let s = Arc::clone(&sibling);
        worker.spawn_periodic(Duration::from_secs(1), Duration::from_secs(1), || Flow::Finish);
        worker.spawn_periodic(Duration::from_secs(5), Duration::from_secs(5), move || {
            s.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        });

        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(sibling.load(Ordering::SeqCst), 0);
        assert!(!worker.is_running());
    }

    #[test]
    fn close_from_inside_body_takes_effect_after_body() {
        let gate = RunGate::new();
        let inner = gate.clone();
        let flow = gate.pass(|| {
            assert!(inner.close());
            assert!(!inner.close());
            Flow::Continue
        });
        assert_eq!(flow, Flow::Finish);
        assert!(!gate.is_open());
        assert_eq!(gate.pass(|| unreachable!()), Flow::Finish);
    }

    #[test]
    fn closed_gate_skips_body() {
        let gate = RunGate::new();
        assert!(gate.close());
        assert!(!gate.close());
        let mut ran = false;
        gate.pass(|| {
            ran = true;
            Flow::Continue
        });
        assert!(!ran);
    }

    #[test]
    fn isolate_turns_panics_into_errors() {
        assert_eq!(isolate(|| 7), Ok(7));
        assert_eq!(
            isolate(|| -> i32 { panic!("bad tick") }),
            Err("bad tick".to_owned())
        );
        let code = 3;
        assert_eq!(
            isolate(|| -> i32 { panic!("code {code}") }),
            Err("code 3".to_owned())
        );
    }
}

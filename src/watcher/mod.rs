//! Generic polling watcher.
//!
//! A [`WatcherEngine`] calls a `detect` function on a fixed interval and
//! hands every detection to `on_detect`. An optional [`Sweep`] runs on its
//! own cadence so a slow `detect` never delays record expiry.
//!
//! Two concrete watchers are built on it: [`objective`] (first participant
//! to satisfy the win condition) and [`feature`] (spatial feature
//! discovery with de-duplication).

pub mod feature;
pub mod objective;
pub mod records;

use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::observability::metrics;
use crate::schedule::{Flow, Worker, isolate};

pub use records::{FeatureRecord, FeatureRecords, FeatureSighting};

/// Whether a watcher should keep polling after a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    /// Keep polling.
    Continue,
    /// Stop the watcher; remaining detections of this poll are dropped.
    Stop,
}

/// Periodic record expiry, independent of detection polling.
pub struct Sweep {
    /// Delay before the first sweep
    pub delay: Duration,
    /// Interval between sweeps
    pub every: Duration,
    /// Purges expired records, returning how many were removed
    pub purge: Box<dyn FnMut() -> usize + Send>,
}

impl std::fmt::Debug for Sweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweep")
            .field("delay", &self.delay)
            .field("every", &self.every)
            .finish_non_exhaustive()
    }
}

/// A running watcher.
pub struct WatcherEngine {
    worker: Worker,
}

impl WatcherEngine {
    /// Starts polling every `poll`, first poll after one interval.
    ///
    /// A failing or panicking `detect` is logged and counted; the next poll runs as
    /// scheduled.
    pub fn start<T, D, H>(
        runtime: &Handle,
        name: &str,
        poll: Duration,
        mut detect: D,
        mut on_detect: H,
        sweep: Option<Sweep>,
    ) -> Self
    where
        T: Send + 'static,
        D: FnMut() -> Result<Vec<T>, EngineError> + Send + 'static,
        H: FnMut(T) -> PollControl + Send + 'static,
    {
        let worker = Worker::new(name, runtime.clone());
        let watcher = name.to_owned();

        worker.spawn_periodic(poll, poll, move || {
            let polled = isolate(&mut detect).unwrap_or_else(|message| {
                Err(EngineError::WatcherTickFailure {
                    watcher: watcher.clone(),
                    message,
                })
            });
            match polled {
                Ok(found) => {
                    for detection in found {
                        if on_detect(detection) == PollControl::Stop {
                            info!(watcher = %watcher, "watcher finished");
                            return Flow::Finish;
                        }
                    }
                    Flow::Continue
                }
                Err(e) => {
                    warn!(watcher = %watcher, error = %e, "watcher poll failed; continuing");
                    metrics::record_tick_failure(&watcher);
                    Flow::Continue
                }
            }
        });

        if let Some(Sweep {
            delay,
            every,
            mut purge,
        }) = sweep
        {
            let watcher = name.to_owned();
            worker.spawn_periodic(delay, every, move || {
                let purged = purge();
                if purged > 0 {
                    debug!(watcher = %watcher, purged, "expired records swept");
                }
                Flow::Continue
            });
        }

        info!(watcher = %name, poll_ms = poll.as_millis(), "watcher started");
        Self { worker }
    }

    /// Watcher name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.worker.name()
    }

    /// Whether the watcher still polls.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stops polling and sweeping. Idempotent; returns `true` only for the
    /// call that stopped a running watcher.
    pub fn stop(&self) -> bool {
        self.worker.stop()
    }

    /// Waits for the background tasks to exit.
    pub async fn join(&self) {
        self.worker.join().await;
    }
}

impl std::fmt::Debug for WatcherEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherEngine")
            .field("name", &self.name())
            .field("running", &self.is_running())
            .finish()
    }
}

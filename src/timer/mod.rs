//! Countdown timer engine.
//!
//! [`Countdown`] is the pure per-second state machine; [`TimerEngine`]
//! drives one on a background [`Worker`], handing every tick to a callback
//! that enqueues the resulting effects.

pub mod format;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{EngineError, SessionError};
use crate::observability::metrics;
use crate::schedule::{Flow, Worker, isolate};

pub use format::{format_duration, format_exact};

/// Default competition length: three and a half hours.
pub const DEFAULT_COUNTDOWN_SECS: i64 = 12_600;

/// Longest accepted countdown: one day.
pub const MAX_COUNTDOWN_SECS: i64 = 86_400;

/// Standard milestone set, in seconds remaining.
pub const DEFAULT_MILESTONES: [i64; 7] = [3600, 1800, 600, 300, 60, 30, 10];

/// Remaining seconds at which the large "ending" indicator is shown.
pub const FINAL_INDICATOR_SECS: i64 = 10;

/// Validates a countdown length.
///
/// # Errors
///
/// Returns [`SessionError::InvalidArgument`] outside `[1, 86400]`.
pub fn validate_duration(total_seconds: i64) -> Result<i64, SessionError> {
    if (1..=MAX_COUNTDOWN_SECS).contains(&total_seconds) {
        Ok(total_seconds)
    } else {
        Err(SessionError::InvalidArgument(format!(
            "countdown must be between 1 and {MAX_COUNTDOWN_SECS} seconds, got {total_seconds}"
        )))
    }
}

/// Milestones for one countdown run, plus an optional periodic reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Milestones {
    marks: BTreeSet<i64>,
    reminder_every: Option<i64>,
}

impl Milestones {
    /// Milestones at the given remaining-seconds values, no reminder.
    #[must_use]
    pub fn new(marks: impl IntoIterator<Item = i64>) -> Self {
        Self {
            marks: marks.into_iter().filter(|m| *m > 0).collect(),
            reminder_every: None,
        }
    }

    /// The standard competition milestones.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(DEFAULT_MILESTONES)
    }

    /// Adds a reminder on every multiple of `every` seconds remaining.
    #[must_use]
    pub fn with_reminder(mut self, every: i64) -> Self {
        self.reminder_every = (every > 0).then_some(every);
        self
    }

    /// Configured marks, ascending.
    pub fn marks(&self) -> impl Iterator<Item = i64> + '_ {
        self.marks.iter().copied()
    }
}

/// What a single tick produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// An ordinary second elapsed.
    Running {
        /// Seconds left after this tick
        remaining: i64,
        /// Whether a periodic reminder falls on this second
        reminder: bool,
    },
    /// A milestone was reached; it will not fire again in this run.
    Milestone {
        /// Seconds left after this tick, equal to the milestone
        remaining: i64,
        /// Whether a periodic reminder also falls on this second
        reminder: bool,
    },
    /// The countdown reached zero.
    Completed,
}

impl Tick {
    /// Seconds left after this tick.
    #[must_use]
    pub const fn remaining(&self) -> i64 {
        match self {
            Self::Running { remaining, .. } | Self::Milestone { remaining, .. } => *remaining,
            Self::Completed => 0,
        }
    }
}

/// Per-second countdown state.
///
/// The remaining counter is shared so other threads can read it while the
/// engine owns the countdown.
#[derive(Debug)]
pub struct Countdown {
    remaining: Arc<AtomicI64>,
    pending: BTreeSet<i64>,
    reminder_every: Option<i64>,
    completed: bool,
}

impl Countdown {
    /// Creates a countdown of `total_seconds`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] outside `[1, 86400]`.
    pub fn new(total_seconds: i64, milestones: &Milestones) -> Result<Self, SessionError> {
        let total = validate_duration(total_seconds)?;
        Ok(Self {
            remaining: Arc::new(AtomicI64::new(total)),
            pending: milestones.marks.range(..total).copied().collect(),
            reminder_every: milestones.reminder_every,
            completed: false,
        })
    }

    /// Seconds left.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Shared handle on the remaining counter.
    #[must_use]
    pub fn remaining_handle(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.remaining)
    }

    /// Milestones that have not fired yet, ascending.
    pub fn pending(&self) -> impl Iterator<Item = i64> + '_ {
        self.pending.iter().copied()
    }

    /// Advances by one second.
    ///
    /// Reaching a milestone clears it together with every pending milestone
    /// above it, so milestones fire at most once and in decreasing order.
    pub fn tick(&mut self) -> Tick {
        if self.completed {
            return Tick::Completed;
        }
        let remaining = self.remaining.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining <= 0 {
            self.remaining.store(0, Ordering::SeqCst);
            self.pending.clear();
            self.completed = true;
            return Tick::Completed;
        }

        let reminder = remaining > FINAL_INDICATOR_SECS
            && self
                .reminder_every
                .is_some_and(|every| remaining % every == 0);

        if self.pending.contains(&remaining) {
            self.pending.retain(|m| *m < remaining);
            Tick::Milestone {
                remaining,
                reminder,
            }
        } else {
            Tick::Running {
                remaining,
                reminder,
            }
        }
    }
}

/// A running countdown on a background worker.
pub struct TimerEngine {
    worker: Worker,
    remaining: Arc<AtomicI64>,
    total: i64,
}

impl TimerEngine {
    /// Validates the duration, then starts ticking once per second.
    ///
    /// `on_tick` runs for every non-final tick; an error from it is logged
    /// and the timer keeps ticking. `on_complete` runs once when the count
    /// reaches zero, after which the engine stops itself.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] for a duration outside
    /// `[1, 86400]`; nothing is spawned in that case.
    pub fn start<T, C>(
        runtime: &Handle,
        name: &str,
        total_seconds: i64,
        milestones: &Milestones,
        mut on_tick: T,
        on_complete: C,
    ) -> Result<Self, SessionError>
    where
        T: FnMut(Tick) -> Result<(), EngineError> + Send + 'static,
        C: FnOnce() -> Result<(), EngineError> + Send + 'static,
    {
        let mut countdown = Countdown::new(total_seconds, milestones)?;
        let remaining = countdown.remaining_handle();
        let worker = Worker::new(name, runtime.clone());
        let timer = name.to_owned();
        let mut on_complete = Some(on_complete);

        worker.spawn_periodic(Duration::from_secs(1), Duration::from_secs(1), move || {
            let tick = countdown.tick();
            metrics::set_countdown_remaining(&timer, tick.remaining());
            match tick {
                Tick::Completed => {
                    info!(timer = %timer, "countdown completed");
                    if let Some(done) = on_complete.take() {
                        if let Err(e) = done() {
                            warn!(timer = %timer, error = %e, "countdown completion failed");
                            metrics::record_tick_failure(&timer);
                        }
                    }
                    Flow::Finish
                }
                tick => {
                    if let Tick::Milestone { remaining, .. } = tick {
                        debug!(timer = %timer, remaining, "milestone reached");
                        metrics::record_milestone(&timer);
                    }
                    let outcome = isolate(|| on_tick(tick)).unwrap_or_else(|message| {
                        Err(EngineError::TimerTickFailure {
                            remaining: tick.remaining(),
                            message,
                        })
                    });
                    if let Err(e) = outcome {
                        warn!(
                            timer = %timer,
                            remaining = tick.remaining(),
                            error = %e,
                            "timer tick failed; continuing"
                        );
                        metrics::record_tick_failure(&timer);
                    }
                    Flow::Continue
                }
            }
        });

        info!(timer = %name, total_seconds, "countdown started");
        Ok(Self {
            worker,
            remaining,
            total: total_seconds,
        })
    }

    /// Seconds left.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Length the countdown was started with.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.total
    }

    /// Whether the timer still ticks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stops ticking. Idempotent; returns `true` only for the call that
    /// stopped a running timer.
    pub fn stop(&self) -> bool {
        self.worker.stop()
    }

    /// Waits for the background task to exit.
    pub async fn join(&self) {
        self.worker.join().await;
    }
}

impl std::fmt::Debug for TimerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEngine")
            .field("total", &self.total)
            .field("remaining", &self.remaining())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_secs(secs: u64) {
        for _ in 0..secs {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
    }

    #[test]
    fn standard_run_fires_each_milestone_once_in_order() {
        let mut countdown = Countdown::new(DEFAULT_COUNTDOWN_SECS, &Milestones::standard()).unwrap();
        let mut fired = Vec::new();
        let mut completions = 0;
        loop {
            match countdown.tick() {
                Tick::Milestone { remaining, .. } => fired.push(remaining),
                Tick::Completed => {
                    completions += 1;
                    break;
                }
                Tick::Running { .. } => {}
            }
        }
        assert_eq!(fired, vec![3600, 1800, 600, 300, 60, 30, 10]);
        assert_eq!(completions, 1);
        assert_eq!(countdown.remaining(), 0);
    }

    #[test]
    fn milestones_at_or_above_total_never_fire() {
        let mut countdown = Countdown::new(30, &Milestones::standard()).unwrap();
        assert_eq!(countdown.pending().collect::<Vec<_>>(), vec![10]);
        let fired: Vec<_> = std::iter::from_fn(|| match countdown.tick() {
            Tick::Completed => None,
            t => Some(t),
        })
        .filter_map(|t| match t {
            Tick::Milestone { remaining, .. } => Some(remaining),
            _ => None,
        })
        .collect();
        assert_eq!(fired, vec![10]);
    }

    #[test]
    fn lowering_remaining_clears_higher_milestones() {
        let mut countdown = Countdown::new(4000, &Milestones::standard()).unwrap();
        countdown.remaining_handle().store(1801, Ordering::SeqCst);
        assert_eq!(
            countdown.tick(),
            Tick::Milestone {
                remaining: 1800,
                reminder: false
            }
        );
        assert!(countdown.pending().all(|m| m < 1800));
    }

    #[test]
    fn reminders_fall_on_multiples_above_final_seconds() {
        let milestones = Milestones::new([]).with_reminder(1800);
        let mut countdown = Countdown::new(3601, &milestones).unwrap();
        assert_eq!(
            countdown.tick(),
            Tick::Running {
                remaining: 3600,
                reminder: true
            }
        );
        assert_eq!(
            countdown.tick(),
            Tick::Running {
                remaining: 3599,
                reminder: false
            }
        );
    }

    #[test]
    fn completion_is_reported_once_then_sticks() {
        let mut countdown = Countdown::new(1, &Milestones::standard()).unwrap();
        assert_eq!(countdown.tick(), Tick::Completed);
        assert_eq!(countdown.tick(), Tick::Completed);
        assert_eq!(countdown.remaining(), 0);
    }

    #[test]
    fn duration_bounds_are_inclusive() {
        assert!(validate_duration(1).is_ok());
        assert!(validate_duration(MAX_COUNTDOWN_SECS).is_ok());
        assert!(matches!(validate_duration(0), Err(SessionError::InvalidArgument(_))));
        assert!(matches!(
            validate_duration(MAX_COUNTDOWN_SECS + 1),
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(matches!(validate_duration(-3), Err(SessionError::InvalidArgument(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_duration_spawns_nothing() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = TimerEngine::start(
            &Handle::current(),
            "countdown",
            0,
            &Milestones::standard(),
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            || Ok(()),
        );
        assert!(matches!(result, Err(SessionError::InvalidArgument(_))));
        advance_secs(3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_ticks_and_completes_once() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicU32::new(0));
        let (t, d) = (Arc::clone(&ticks), Arc::clone(&done));
        let engine = TimerEngine::start(
            &Handle::current(),
            "countdown",
            12,
            &Milestones::standard(),
            move |tick| {
                t.lock().unwrap().push(tick);
                Ok(())
            },
            move || {
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

        advance_secs(15).await;

        let ticks = ticks.lock().unwrap();
        assert_eq!(ticks.len(), 11);
        assert_eq!(
            ticks.iter().filter(|t| matches!(t, Tick::Milestone { .. })).count(),
            1
        );
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(engine.remaining(), 0);
        assert!(!engine.is_running());
        assert!(!engine.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tick_does_not_stop_the_timer() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let engine = TimerEngine::start(
            &Handle::current(),
            "countdown",
            100,
            &Milestones::standard(),
            move |tick| {
                c.fetch_add(1, Ordering::SeqCst);
                if tick.remaining() % 2 == 0 {
                    Err(EngineError::TimerTickFailure {
                        remaining: tick.remaining(),
                        message: "broadcast failed".into(),
                    })
                } else {
                    Ok(())
                }
            },
            || Ok(()),
        )
        .unwrap();

        advance_secs(5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(engine.is_running());
        assert_eq!(engine.remaining(), 95);
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tick_does_not_stop_the_timer() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let engine = TimerEngine::start(
            &Handle::current(),
            "countdown",
            100,
            &Milestones::standard(),
            move |tick| {
                c.fetch_add(1, Ordering::SeqCst);
                assert!(tick.remaining() != 98, "bad tick");
                Ok(())
            },
            || Ok(()),
        )
        .unwrap();

        advance_secs(5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(engine.remaining(), 95);
        assert!(engine.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_twice_equals_stop_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let engine = TimerEngine::start(
            &Handle::current(),
            "countdown",
            100,
            &Milestones::standard(),
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            || Ok(()),
        )
        .unwrap();

        advance_secs(3).await;
        assert!(engine.stop());
        assert!(!engine.stop());
        let frozen = engine.remaining();

        advance_secs(5).await;
        assert_eq!(engine.remaining(), frozen);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        engine.join().await;
    }
}

//! Session phase and its lock-free state word.
//!
//! The phase and a transition epoch share one `AtomicU64`, so every
//! transition is a single compare-and-swap and a racing `start`/`cancel`
//! pair always observes a consistent before/after value. Work scheduled
//! under one epoch carries its [`Snapshot`] and applies only while that
//! snapshot is still current.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Stage of the competition lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    /// Nothing running.
    Idle = 0,
    /// Preparation hold or spawn selection.
    Preparing = 1,
    /// The competition countdown is running.
    CountdownRunning = 2,
    /// Finished by time-up or a winner; awaiting reset.
    Ended = 3,
}

impl Phase {
    const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Preparing,
            2 => Self::CountdownRunning,
            3 => Self::Ended,
            _ => Self::Idle,
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::CountdownRunning => "countdown_running",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase together with the epoch it was entered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Number of transitions before this one
    pub epoch: u64,
    /// Phase at that epoch
    pub phase: Phase,
}

impl Snapshot {
    const fn pack(self) -> u64 {
        (self.epoch << 8) | self.phase as u64
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn unpack(word: u64) -> Self {
        Self {
            epoch: word >> 8,
            phase: Phase::from_bits((word & 0xff) as u8),
        }
    }
}

/// Atomic `(epoch, phase)` word.
#[derive(Debug)]
pub struct SessionState {
    word: AtomicU64,
}

impl SessionState {
    /// Starts in [`Phase::Idle`] at epoch 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    /// Current phase and epoch.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::unpack(self.word.load(Ordering::SeqCst))
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.snapshot().phase
    }

    /// Moves to `to` only if the state still equals `expected`.
    ///
    /// Returns the new snapshot on success.
    pub fn try_advance(&self, expected: Snapshot, to: Phase) -> Option<Snapshot> {
        let next = Snapshot {
            epoch: expected.epoch + 1,
            phase: to,
        };
        self.word
            .compare_exchange(expected.pack(), next.pack(), Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| next)
    }

    /// Moves to `to` from any phase in `allowed`.
    ///
    /// # Errors
    ///
    /// Returns the observed snapshot when the current phase is not allowed.
    pub fn advance_from(&self, allowed: &[Phase], to: Phase) -> Result<(Snapshot, Snapshot), Snapshot> {
        loop {
            let current = self.snapshot();
            if !allowed.contains(&current.phase) {
                return Err(current);
            }
            if let Some(next) = self.try_advance(current, to) {
                return Ok((current, next));
            }
        }
    }

    /// Moves to `to` unconditionally. Returns the previous snapshot.
    pub fn force(&self, to: Phase) -> Snapshot {
        loop {
            let current = self.snapshot();
            if self.try_advance(current, to).is_some() {
                return current;
            }
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

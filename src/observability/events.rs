//! Structured session event stream.
//!
//! Discrete, typed events emitted as the session moves through its
//! lifecycle. Events are serialized as newline-delimited JSON (JSONL) and
//! carry a monotonically increasing sequence number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::Phase;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during a session.
///
/// Serialized with a `"type"` tag so consumers can dispatch on the kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The coordinator is up and accepting commands.
    SessionStarted {
        /// When the coordinator started.
        timestamp: DateTime<Utc>,
        /// Host ticks per second.
        tick_rate: u32,
    },

    /// The session phase changed.
    PhaseChanged {
        /// When the transition happened.
        timestamp: DateTime<Utc>,
        /// Phase before the transition.
        from: Phase,
        /// Phase after the transition.
        to: Phase,
        /// Epoch of the new phase.
        epoch: u64,
    },

    /// A countdown milestone was broadcast.
    MilestoneReached {
        /// When the milestone was applied.
        timestamp: DateTime<Utc>,
        /// Timer that reached it.
        timer: String,
        /// Seconds remaining.
        remaining: i64,
    },

    /// The competition countdown reached zero.
    CountdownFinished {
        /// When time ran out.
        timestamp: DateTime<Utc>,
        /// Length the countdown was started with.
        total_seconds: i64,
    },

    /// A participant satisfied the win condition.
    WinnerDeclared {
        /// When the win was applied.
        timestamp: DateTime<Utc>,
        /// Winner identity.
        participant: String,
        /// Winner display name.
        name: String,
    },

    /// The spatial watcher admitted a new feature.
    FeatureDiscovered {
        /// When the feature was admitted.
        timestamp: DateTime<Utc>,
        /// Feature fingerprint.
        key: String,
        /// Discoverer display name.
        discoverer: String,
    },

    /// Command privileges were revoked.
    PermissionsRevoked {
        /// When the revocation happened.
        timestamp: DateTime<Utc>,
        /// Number of participants newly disabled.
        count: usize,
    },

    /// Command privileges were restored.
    PermissionsRestored {
        /// When the restore happened.
        timestamp: DateTime<Utc>,
        /// Number of participants restored.
        count: usize,
    },

    /// The coordinator shut down.
    SessionStopped {
        /// When it stopped.
        timestamp: DateTime<Utc>,
        /// Human-readable reason.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped: observability never stops
/// the session.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        let mut w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(line) = serde_json::to_string(&envelope) {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

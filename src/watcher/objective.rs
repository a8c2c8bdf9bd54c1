//! Win-condition watcher.
//!
//! Polls every online participant for the competition objective. The first
//! participant observed with it wins; the watcher then stops itself and
//! hands the winner to its callback. Later detections, in the same poll or
//! after, are ignored once a winner is recorded.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::info;

use crate::error::EngineError;
use crate::host::{Participant, ParticipantId, WorldProbe};
use crate::observability::metrics;
use crate::watcher::{PollControl, WatcherEngine};

/// Engine name used in logs and metrics.
pub const NAME: &str = "objective";

/// The participant credited with the win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    /// Winner identity
    pub participant: ParticipantId,
    /// Winner display name
    pub name: String,
    /// When the win was recorded
    pub at: DateTime<Utc>,
}

/// Who has satisfied the objective during the current watch, and who won.
#[derive(Debug, Default)]
pub struct ObjectiveTracker {
    achievers: DashMap<ParticipantId, String>,
    winner: Mutex<Option<Winner>>,
}

impl ObjectiveTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets achievers and the winner.
    pub fn reset(&self) {
        self.achievers.clear();
        *self.winner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The recorded winner, if any.
    #[must_use]
    pub fn winner(&self) -> Option<Winner> {
        self.winner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of everyone observed with the objective, sorted.
    #[must_use]
    pub fn achievers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.achievers.iter().map(|e| e.value().clone()).collect();
        names.sort();
        names
    }

    /// Records an achiever; returns the new winner if nobody had won yet.
    pub fn claim(&self, participant: &Participant) -> Option<Winner> {
        self.achievers
            .insert(participant.id, participant.name.clone());
        let mut slot = self.winner.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return None;
        }
        let winner = Winner {
            participant: participant.id,
            name: participant.name.clone(),
            at: Utc::now(),
        };
        *slot = Some(winner.clone());
        Some(winner)
    }
}

/// Online participants currently satisfying the objective.
///
/// # Errors
///
/// Returns [`EngineError::WatcherTickFailure`] when the world cannot be read.
pub fn detect_achievers(probe: &dyn WorldProbe) -> Result<Vec<Participant>, EngineError> {
    let failure = |e: EngineError| EngineError::WatcherTickFailure {
        watcher: NAME.to_owned(),
        message: e.to_string(),
    };
    let mut found = Vec::new();
    for participant in probe.participants().map_err(failure)? {
        if probe
            .has_completed_objective(participant.id)
            .map_err(failure)?
        {
            found.push(participant);
        }
    }
    Ok(found)
}

/// Starts the win-condition watcher.
///
/// The tracker is reset first. `on_winner` runs on the watcher task exactly
/// once, for the first achiever; it must only enqueue work.
pub fn start<F>(
    runtime: &Handle,
    poll: Duration,
    probe: Arc<dyn WorldProbe>,
    tracker: Arc<ObjectiveTracker>,
    mut on_winner: F,
) -> WatcherEngine
where
    F: FnMut(Winner) + Send + 'static,
{
    tracker.reset();
    WatcherEngine::start(
        runtime,
        NAME,
        poll,
        move || detect_achievers(probe.as_ref()),
        move |participant: Participant| match tracker.claim(&participant) {
            Some(winner) => {
                info!(winner = %winner.name, participant = %winner.participant, "objective completed");
                metrics::record_detection(NAME, true);
                on_winner(winner);
                PollControl::Stop
            }
            None => {
                metrics::record_detection(NAME, false);
                PollControl::Continue
            }
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Vec3;
    use crate::sandbox::SandboxWorld;

    async fn advance_secs(secs: u64) {
        for _ in 0..secs {
            tokio::time::advance(Duration::from_secs(1)).await;
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }
    }

    #[test]
    fn first_claim_wins() {
        let tracker = ObjectiveTracker::new();
        let world = SandboxWorld::new();
        let a = world.join("alice", Vec3::default(), false);
        let b = world.join("bob", Vec3::default(), false);
        let online = world.probe().participants().unwrap();
        let alice = online.iter().find(|p| p.id == a).unwrap();
        let bob = online.iter().find(|p| p.id == b).unwrap();

        assert_eq!(tracker.claim(alice).unwrap().name, "alice");
        assert!(tracker.claim(bob).is_none());
        assert_eq!(tracker.winner().unwrap().participant, a);
        assert_eq!(tracker.achievers(), vec!["alice", "bob"]);

        tracker.reset();
        assert!(tracker.winner().is_none());
        assert!(tracker.achievers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_reports_one_winner_and_stops() {
        let world = SandboxWorld::new();
        let alice = world.join("alice", Vec3::default(), false);
        let bob = world.join("bob", Vec3::default(), false);
        let tracker = Arc::new(ObjectiveTracker::new());
        let winners = Arc::new(Mutex::new(Vec::new()));
        let w = Arc::clone(&winners);

        let watcher = start(
            &Handle::current(),
            Duration::from_secs(1),
            world.probe(),
            Arc::clone(&tracker),
            move |winner| w.lock().unwrap().push(winner.name),
        );

        advance_secs(2).await;
        assert!(winners.lock().unwrap().is_empty());

        world.complete_objective(bob);
        world.complete_objective(alice);
        advance_secs(3).await;

        assert_eq!(winners.lock().unwrap().len(), 1);
        assert!(!watcher.is_running());
        assert!(tracker.winner().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_keeps_watching() {
        let world = SandboxWorld::new();
        let alice = world.join("alice", Vec3::default(), false);
        let tracker = Arc::new(ObjectiveTracker::new());
        let watcher = start(
            &Handle::current(),
            Duration::from_secs(1),
            world.probe(),
            Arc::clone(&tracker),
            |_| {},
        );

        world.fail_probes(Some("chunk not loaded"));
        advance_secs(3).await;
        assert!(watcher.is_running());

        world.fail_probes(None);
        world.complete_objective(alice);
        advance_secs(1).await;
        assert_eq!(tracker.winner().unwrap().name, "alice");
    }

    #[test]
    fn detect_maps_probe_errors() {
        let world = SandboxWorld::new();
        world.fail_probes(Some("offline"));
        let err = detect_achievers(world.probe().as_ref()).unwrap_err();
        assert!(matches!(err, EngineError::WatcherTickFailure { ref watcher, .. } if watcher == NAME));
    }
}

//! Phase controller: the session state machine and the engines it owns.
//!
//! Transitions are serialized by the slot lock and published through the
//! single-word [`SessionState`]. Background engines never mutate the world;
//! their callbacks enqueue deferred tasks, and the tasks that change phase
//! carry the [`Snapshot`] they were scheduled under so a run that has since
//! been cancelled or replaced is left alone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::announce;
use crate::config::SessionConfig;
use crate::error::{EngineError, SessionError};
use crate::host::{
    Audience, EffectKind, ParticipantId, PlayMode, Simulation, StatusEffect, WorldProbe,
};
use crate::observability::{Event, EventEmitter, metrics};
use crate::session::phase::{Phase, SessionState, Snapshot};
use crate::tasks::TaskSender;
use crate::teams::{SpawnGroup, TeamRegistry};
use crate::timer::{Tick, TimerEngine, validate_duration};
use crate::watcher::objective::{self, ObjectiveTracker, Winner};
use crate::watcher::{FeatureRecords, WatcherEngine, feature};

/// Engine name of the spawn-selection timer.
pub const SPAWN_SELECTION: &str = "spawn_selection";

/// Engine name of the competition countdown.
pub const COUNTDOWN: &str = "countdown";

/// What a [`Phase::Preparing`] session is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepMode {
    /// Untimed hold started by `startprep`.
    Holding,
    /// Timed spawn selection started by `start`.
    SpawnSelection,
}

/// How an [`Phase::Ended`] session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The countdown reached zero.
    TimeUp,
    /// A participant satisfied the win condition.
    Winner(Winner),
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeUp => f.write_str("time up"),
            Self::Winner(w) => write!(f, "won by {}", w.name),
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current phase
    pub phase: Phase,
    /// Transition epoch
    pub epoch: u64,
    /// Preparation mode while preparing
    pub prep_mode: Option<PrepMode>,
    /// Seconds left on the running timer and which timer it is
    pub timer: Option<(&'static str, i64)>,
    /// Outcome once ended
    pub outcome: Option<Outcome>,
    /// Whether the win-condition watcher runs
    pub objective_watch: bool,
    /// Whether the feature watcher runs
    pub feature_watch: bool,
}

struct ActiveTimer {
    name: &'static str,
    engine: TimerEngine,
}

#[derive(Default)]
struct Slots {
    timer: Option<ActiveTimer>,
    objective: Option<WatcherEngine>,
    feature: Option<WatcherEngine>,
    prep_mode: Option<PrepMode>,
    outcome: Option<Outcome>,
}

impl Slots {
    fn running_timer(&self) -> Option<&ActiveTimer> {
        self.timer.as_ref().filter(|t| t.engine.is_running())
    }

    fn stop_timer(&mut self) -> bool {
        self.timer.take().is_some_and(|t| t.engine.stop())
    }

    fn stop_objective(&mut self) -> bool {
        self.objective.take().is_some_and(|w| w.stop())
    }

    fn stop_feature(&mut self) -> bool {
        self.feature.take().is_some_and(|w| w.stop())
    }
}

/// Shared collaborators of the controller.
pub struct ControllerParts {
    /// Session settings
    pub config: Arc<SessionConfig>,
    /// Runtime the engines are spawned on
    pub runtime: Handle,
    /// Producer side of the simulation-thread queue
    pub sender: TaskSender,
    /// Team registry, used for spawn computation
    pub teams: Arc<TeamRegistry>,
    /// Feature de-duplication records
    pub features: Arc<FeatureRecords>,
    /// Win-condition progress
    pub objective: Arc<ObjectiveTracker>,
    /// Thread-safe world reads for the watchers
    pub probe: Arc<dyn WorldProbe>,
    /// Structured event sink
    pub events: Arc<EventEmitter>,
}

/// Owns the session phase and every engine of the session.
pub struct PhaseController {
    me: Weak<Self>,
    state: SessionState,
    slots: Mutex<Slots>,
    config: Arc<SessionConfig>,
    runtime: Handle,
    sender: TaskSender,
    teams: Arc<TeamRegistry>,
    features: Arc<FeatureRecords>,
    objective: Arc<ObjectiveTracker>,
    probe: Arc<dyn WorldProbe>,
    events: Arc<EventEmitter>,
}

impl PhaseController {
    /// Creates an idle controller.
    #[must_use]
    pub fn new(parts: ControllerParts) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: SessionState::new(),
            slots: Mutex::new(Slots::default()),
            config: parts.config,
            runtime: parts.runtime,
            sender: parts.sender,
            teams: parts.teams,
            features: parts.features,
            objective: parts.objective,
            probe: parts.probe,
            events: parts.events,
        })
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transitioned(&self, from: Snapshot, to: Snapshot) {
        info!(from = %from.phase, to = %to.phase, epoch = to.epoch, "phase changed");
        metrics::record_phase_transition(from.phase.as_str(), to.phase.as_str());
        self.events.emit(Event::PhaseChanged {
            timestamp: Utc::now(),
            from: from.phase,
            to: to.phase,
            epoch: to.epoch,
        });
    }

    fn advance(&self, expected: Snapshot, to: Phase) -> Option<Snapshot> {
        let next = self.state.try_advance(expected, to)?;
        self.transitioned(expected, next);
        Some(next)
    }

    fn force_idle(&self, slots: &mut Slots) {
        slots.stop_timer();
        slots.prep_mode = None;
        let before = self.state.force(Phase::Idle);
        self.transitioned(before, self.state.snapshot());
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Current phase and epoch.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    /// Full status view.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let slots = self.slots();
        let snap = self.state.snapshot();
        SessionStatus {
            phase: snap.phase,
            epoch: snap.epoch,
            prep_mode: slots.prep_mode,
            timer: slots
                .running_timer()
                .map(|t| (t.name, t.engine.remaining())),
            outcome: slots.outcome.clone(),
            objective_watch: slots.objective.as_ref().is_some_and(WatcherEngine::is_running),
            feature_watch: slots.feature.as_ref().is_some_and(WatcherEngine::is_running),
        }
    }

    /// Seconds left on the competition countdown, if one runs.
    #[must_use]
    pub fn remaining(&self) -> Option<i64> {
        self.slots()
            .running_timer()
            .filter(|t| t.name == COUNTDOWN)
            .map(|t| t.engine.remaining())
    }

    // ------------------------------------------------------------------
    // Preparation
    // ------------------------------------------------------------------

    /// Places every other online participant in the preparation hold.
    ///
    /// Returns how many participants were held; with nobody else online
    /// this is a no-op returning 0.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyRunning`] unless the session is idle.
    pub fn start_preparation(
        &self,
        sim: &mut dyn Simulation,
        initiator: Option<ParticipantId>,
    ) -> Result<usize, SessionError> {
        let mut slots = self.slots();
        let current = self.state.snapshot();
        if current.phase != Phase::Idle {
            return Err(SessionError::AlreadyRunning(format!(
                "session is {}",
                current.phase
            )));
        }
        let held: Vec<_> = sim
            .online()
            .into_iter()
            .filter(|p| Some(p.id) != initiator)
            .collect();
        if held.is_empty() {
            info!("preparation requested with nobody else online");
            return Ok(0);
        }
        self.advance(current, Phase::Preparing).ok_or_else(|| {
            SessionError::AlreadyRunning("session changed phase concurrently".into())
        })?;
        slots.prep_mode = Some(PrepMode::Holding);
        drop(slots);

        let hold = self.config.preparation.hold_effects;
        let notice = announce::preparation_hold();
        for participant in &held {
            let id = participant.id;
            sim.set_mode(id, PlayMode::Spectator);
            sim.teleport(id, self.config.holding_area);
            sim.clear_effects(id);
            sim.apply_effect(id, StatusEffect::new(EffectKind::Blindness, hold, 0));
            sim.apply_effect(id, StatusEffect::new(EffectKind::Slowness, hold, 255));
            sim.apply_effect(id, StatusEffect::new(EffectKind::MiningFatigue, hold, 255));
            sim.deliver(Audience::Only(id), &notice);
        }
        info!(held = held.len(), "preparation hold started");
        Ok(held.len())
    }

    /// Starts spawn selection, after which the countdown begins.
    ///
    /// Accepted from idle or from a preparation hold. Returns the number
    /// of online participants.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyRunning`] once spawn selection or a countdown
    /// is in progress, or after the session ended.
    pub fn start(
        &self,
        sim: &mut dyn Simulation,
        initiator: Option<ParticipantId>,
    ) -> Result<usize, SessionError> {
        let mut slots = self.slots();
        let current = self.state.snapshot();
        let startable = match current.phase {
            Phase::Idle => slots.running_timer().is_none(),
            Phase::Preparing => slots.prep_mode == Some(PrepMode::Holding),
            Phase::CountdownRunning | Phase::Ended => false,
        };
        if !startable {
            return Err(SessionError::AlreadyRunning(format!(
                "session is {}",
                current.phase
            )));
        }
        let selecting = self.advance(current, Phase::Preparing).ok_or_else(|| {
            SessionError::AlreadyRunning("session changed phase concurrently".into())
        })?;
        slots.prep_mode = Some(PrepMode::SpawnSelection);

        let seconds = self.config.preparation.seconds();
        let sender = self.sender.clone();
        let done = self.sender.clone();
        let me = self.me.clone();
        let started = TimerEngine::start(
            &self.runtime,
            SPAWN_SELECTION,
            seconds,
            &self.config.preparation.milestone_set(),
            move |tick| {
                if let Tick::Milestone { remaining, .. } = tick {
                    sender.defer("spawn-selection-cue", move |sim| {
                        sim.deliver(Audience::Everyone, &announce::spawn_selection_tick(remaining));
                    })?;
                }
                Ok(())
            },
            move || {
                done.defer("complete-preparation", move |sim| {
                    if let Some(ctl) = me.upgrade() {
                        ctl.complete_preparation(sim, selecting, initiator);
                    }
                })
                .map(|_| ())
            },
        );
        match started {
            Ok(engine) => {
                slots.timer = Some(ActiveTimer {
                    name: SPAWN_SELECTION,
                    engine,
                });
            }
            Err(e) => {
                error!(error = %e, "spawn selection timer failed to start");
                self.force_idle(&mut slots);
                return Err(e);
            }
        }
        drop(slots);

        let online = sim.online();
        for participant in online.iter().filter(|p| Some(p.id) != initiator) {
            sim.set_mode(participant.id, PlayMode::Spectator);
            sim.clear_effects(participant.id);
            sim.teleport(participant.id, self.config.holding_area);
            sim.deliver(
                Audience::Only(participant.id),
                &announce::spawn_selection_private(),
            );
        }
        sim.deliver(
            Audience::Everyone,
            &announce::spawn_selection_started(seconds),
        );
        info!(seconds, participants = online.len(), "spawn selection started");
        Ok(online.len().max(1))
    }

    /// Spawn selection finished: relocate every team and start the
    /// countdown. The initiator neither counts towards a spawn nor moves.
    /// Does nothing if `expected` is no longer current.
    pub fn complete_preparation(
        &self,
        sim: &mut dyn Simulation,
        expected: Snapshot,
        initiator: Option<ParticipantId>,
    ) {
        let mut slots = self.slots();
        if self.state.snapshot() != expected {
            debug!(
                scheduled_epoch = expected.epoch,
                "stale preparation completion ignored"
            );
            return;
        }
        slots.timer = None;

        let online: Vec<_> = sim
            .online()
            .into_iter()
            .filter(|p| Some(p.id) != initiator)
            .collect();
        let positions: HashMap<_, _> = online.iter().map(|p| (p.id, p.position)).collect();
        let spawns = self.teams.compute_spawns(&positions);
        for (group, spawn) in &spawns {
            let members = online
                .iter()
                .filter(|p| {
                    self.teams
                        .team_of(p.id)
                        .map_or(SpawnGroup::Ungrouped, SpawnGroup::Team)
                        == *group
                })
                .count();
            info!("{}", announce::spawn_computed(*group, *spawn, members));
        }

        for participant in &online {
            let group = self
                .teams
                .team_of(participant.id)
                .map_or(SpawnGroup::Ungrouped, SpawnGroup::Team);
            sim.set_mode(participant.id, PlayMode::Survival);
            sim.clear_effects(participant.id);
            if let Some(spawn) = spawns.get(&group) {
                sim.teleport(participant.id, *spawn);
                sim.deliver(Audience::Only(participant.id), &announce::relocated(group));
            }
        }
        sim.deliver(Audience::Everyone, &announce::competition_begins());

        let Some(running) = self.advance(expected, Phase::CountdownRunning) else {
            warn!("phase changed during spawn relocation; countdown not started");
            return;
        };
        slots.prep_mode = None;
        let total = self.config.countdown.default_seconds();
        if let Err(e) = self.start_countdown_engine(&mut slots, running, total) {
            error!(error = %e, "countdown failed to start after preparation");
            self.force_idle(&mut slots);
            return;
        }
        drop(slots);
        sim.deliver(Audience::Everyone, &announce::countdown_started(total));
    }

    /// Cancels preparation or a running countdown and returns to idle.
    ///
    /// Every other online participant is reset to spectator. Returns the
    /// number of participants reset, at least 1.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotRunning`] when idle or ended.
    pub fn cancel(
        &self,
        sim: &mut dyn Simulation,
        initiator: Option<ParticipantId>,
    ) -> Result<usize, SessionError> {
        let mut slots = self.slots();
        let current = self.state.snapshot();
        if !matches!(current.phase, Phase::Preparing | Phase::CountdownRunning) {
            return Err(SessionError::NotRunning(format!(
                "nothing to cancel, session is {}",
                current.phase
            )));
        }
        self.advance(current, Phase::Idle).ok_or_else(|| {
            SessionError::NotRunning("session changed phase concurrently".into())
        })?;
        slots.stop_timer();
        slots.stop_objective();
        slots.stop_feature();
        slots.prep_mode = None;
        drop(slots);

        let mut reset = 0;
        for participant in sim.online() {
            if Some(participant.id) == initiator {
                continue;
            }
            sim.set_mode(participant.id, PlayMode::Spectator);
            sim.clear_effects(participant.id);
            reset += 1;
        }
        let audience = initiator.map_or(Audience::Everyone, Audience::AllExcept);
        sim.deliver(audience, &announce::start_cancelled());
        info!(reset, "session cancelled");
        Ok(reset.max(1))
    }

    // ------------------------------------------------------------------
    // Countdown
    // ------------------------------------------------------------------

    fn start_countdown_engine(
        &self,
        slots: &mut Slots,
        running: Snapshot,
        total: i64,
    ) -> Result<(), SessionError> {
        let sender = self.sender.clone();
        let done = self.sender.clone();
        let events = Arc::clone(&self.events);
        let me = self.me.clone();
        let engine = TimerEngine::start(
            &self.runtime,
            COUNTDOWN,
            total,
            &self.config.countdown.milestone_set(),
            move |tick| {
                match tick {
                    Tick::Milestone { remaining, .. } => {
                        let events = Arc::clone(&events);
                        sender.defer("countdown-milestone", move |sim| {
                            sim.deliver(Audience::Everyone, &announce::countdown_milestone(remaining));
                            events.emit(Event::MilestoneReached {
                                timestamp: Utc::now(),
                                timer: COUNTDOWN.to_owned(),
                                remaining,
                            });
                        })?;
                    }
                    Tick::Running {
                        remaining,
                        reminder: true,
                    } => {
                        sender.defer("countdown-reminder", move |sim| {
                            sim.deliver(Audience::Everyone, &announce::countdown_reminder(remaining));
                        })?;
                    }
                    Tick::Running { .. } | Tick::Completed => {}
                }
                Ok::<(), EngineError>(())
            },
            move || {
                done.defer("complete-countdown", move |sim| {
                    if let Some(ctl) = me.upgrade() {
                        ctl.complete_countdown(sim, running, total);
                    }
                })
                .map(|_| ())
            },
        )?;
        slots.timer = Some(ActiveTimer {
            name: COUNTDOWN,
            engine,
        });
        Ok(())
    }

    /// Starts the competition countdown from idle.
    ///
    /// `seconds` defaults to the configured length. Returns the length used.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidArgument`] outside `[1, 86400]`, checked before
    /// anything starts; [`SessionError::AlreadyRunning`] unless idle with no
    /// timer running.
    pub fn start_countdown(
        &self,
        sim: &mut dyn Simulation,
        seconds: Option<i64>,
    ) -> Result<i64, SessionError> {
        let total = validate_duration(seconds.unwrap_or_else(|| self.config.countdown.default_seconds()))?;
        let mut slots = self.slots();
        let current = self.state.snapshot();
        if let Some(timer) = slots.running_timer() {
            return Err(SessionError::AlreadyRunning(format!(
                "{} timer has {}s left",
                timer.name,
                timer.engine.remaining()
            )));
        }
        if current.phase != Phase::Idle {
            return Err(SessionError::AlreadyRunning(format!(
                "session is {}",
                current.phase
            )));
        }
        let running = self.advance(current, Phase::CountdownRunning).ok_or_else(|| {
            SessionError::AlreadyRunning("session changed phase concurrently".into())
        })?;
        if let Err(e) = self.start_countdown_engine(&mut slots, running, total) {
            self.force_idle(&mut slots);
            return Err(e);
        }
        drop(slots);
        sim.deliver(Audience::Everyone, &announce::countdown_started(total));
        Ok(total)
    }

    /// Stops the running countdown and returns to idle.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotRunning`] when no countdown runs.
    pub fn stop_countdown(&self, sim: &mut dyn Simulation) -> Result<(), SessionError> {
        let mut slots = self.slots();
        let current = self.state.snapshot();
        let counting = slots.running_timer().is_some_and(|t| t.name == COUNTDOWN);
        if !counting || current.phase != Phase::CountdownRunning {
            return Err(SessionError::NotRunning("no countdown is running".into()));
        }
        slots.stop_timer();
        self.advance(current, Phase::Idle);
        drop(slots);
        sim.deliver(Audience::Everyone, &announce::countdown_stopped());
        Ok(())
    }

    /// The countdown reached zero: end the session. Does nothing if
    /// `expected` is no longer current.
    pub fn complete_countdown(&self, sim: &mut dyn Simulation, expected: Snapshot, total: i64) {
        let mut slots = self.slots();
        if self.advance(expected, Phase::Ended).is_none() {
            debug!(
                scheduled_epoch = expected.epoch,
                "stale countdown completion ignored"
            );
            return;
        }
        slots.timer = None;
        slots.stop_objective();
        slots.outcome = Some(Outcome::TimeUp);
        drop(slots);

        sim.deliver(Audience::Everyone, &announce::time_up());
        self.events.emit(Event::CountdownFinished {
            timestamp: Utc::now(),
            total_seconds: total,
        });
    }

    // ------------------------------------------------------------------
    // Winner
    // ------------------------------------------------------------------

    /// Ends the session in favour of `winner`.
    ///
    /// Ignored when the session already ended or the watch that produced
    /// the winner has since been reset.
    pub fn declare_winner(&self, sim: &mut dyn Simulation, winner: Winner) -> bool {
        let mut slots = self.slots();
        if self
            .objective
            .winner()
            .is_none_or(|w| w.participant != winner.participant)
        {
            debug!(winner = %winner.name, "stale winner ignored");
            return false;
        }
        let Ok((from, to)) = self.state.advance_from(
            &[Phase::Idle, Phase::Preparing, Phase::CountdownRunning],
            Phase::Ended,
        ) else {
            debug!(winner = %winner.name, "session already ended; winner ignored");
            return false;
        };
        self.transitioned(from, to);
        slots.stop_timer();
        slots.stop_objective();
        slots.prep_mode = None;
        slots.outcome = Some(Outcome::Winner(winner.clone()));
        drop(slots);

        sim.deliver(Audience::Everyone, &announce::winner_declared(&winner.name));
        sim.deliver(Audience::Only(winner.participant), &announce::winner_private());
        sim.apply_effect(
            winner.participant,
            StatusEffect::new(EffectKind::HeroOfTheVillage, Duration::from_secs(300), 2),
        );
        sim.apply_effect(
            winner.participant,
            StatusEffect::new(EffectKind::Glowing, Duration::from_secs(600), 0),
        );
        info!(winner = %winner.name, "winner declared");
        self.events.emit(Event::WinnerDeclared {
            timestamp: Utc::now(),
            participant: winner.participant.to_string(),
            name: winner.name,
        });
        true
    }

    /// Returns an ended session to idle. Idle is a no-op; returns whether
    /// anything changed.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyRunning`] while preparing or counting down.
    pub fn reset(&self) -> Result<bool, SessionError> {
        let mut slots = self.slots();
        let current = self.state.snapshot();
        match current.phase {
            Phase::Idle => Ok(false),
            Phase::Ended => {
                self.advance(current, Phase::Idle);
                slots.outcome = None;
                self.objective.reset();
                Ok(true)
            }
            phase => Err(SessionError::AlreadyRunning(format!(
                "session is {phase}; cancel it first"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Watchers
    // ------------------------------------------------------------------

    /// Starts the win-condition watcher.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyRunning`] if it already runs.
    pub fn start_objective_watch(&self, sim: &mut dyn Simulation) -> Result<(), SessionError> {
        let mut slots = self.slots();
        if slots.objective.as_ref().is_some_and(WatcherEngine::is_running) {
            return Err(SessionError::AlreadyRunning("objective watcher".into()));
        }
        let sender = self.sender.clone();
        let me = self.me.clone();
        slots.objective = Some(objective::start(
            &self.runtime,
            self.config.objective_watch.poll,
            Arc::clone(&self.probe),
            Arc::clone(&self.objective),
            move |winner| {
                let me = me.clone();
                if let Err(e) = sender.defer("declare-winner", move |sim| {
                    if let Some(ctl) = me.upgrade() {
                        ctl.declare_winner(sim, winner);
                    }
                }) {
                    warn!(error = %e, "winner could not be scheduled");
                }
            },
        ));
        drop(slots);
        sim.deliver(Audience::Everyone, &announce::objective_watch_started());
        Ok(())
    }

    /// Stops the win-condition watcher.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotRunning`] if it is not running.
    pub fn stop_objective_watch(&self, sim: &mut dyn Simulation) -> Result<(), SessionError> {
        if !self.slots().stop_objective() {
            return Err(SessionError::NotRunning("objective watcher".into()));
        }
        sim.deliver(Audience::Everyone, &announce::watcher_state("Dragon kill", false));
        Ok(())
    }

    /// Starts the spatial feature watcher.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyRunning`] if it already runs.
    pub fn start_feature_watch(&self, sim: &mut dyn Simulation) -> Result<(), SessionError> {
        let mut slots = self.slots();
        if slots.feature.as_ref().is_some_and(WatcherEngine::is_running) {
            return Err(SessionError::AlreadyRunning("feature watcher".into()));
        }
        let sender = self.sender.clone();
        let events = Arc::clone(&self.events);
        slots.feature = Some(feature::start(
            &self.runtime,
            &self.config.feature_watch,
            Arc::clone(&self.probe),
            Arc::clone(&self.features),
            move |record| {
                let events = Arc::clone(&events);
                let scheduled = sender.defer("feature-discovered", move |sim| {
                    sim.deliver(
                        Audience::Everyone,
                        &announce::feature_discovered(
                            &record.discoverer,
                            record.discoverer_position,
                            record.frame,
                            &record.dimension,
                        ),
                    );
                    events.emit(Event::FeatureDiscovered {
                        timestamp: Utc::now(),
                        key: record.key,
                        discoverer: record.discoverer,
                    });
                });
                if let Err(e) = scheduled {
                    warn!(error = %e, "discovery could not be scheduled");
                }
            },
        ));
        drop(slots);
        sim.deliver(Audience::Everyone, &announce::watcher_state("End portal", true));
        Ok(())
    }

    /// Stops the spatial feature watcher. Records are kept.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotRunning`] if it is not running.
    pub fn stop_feature_watch(&self, sim: &mut dyn Simulation) -> Result<(), SessionError> {
        if !self.slots().stop_feature() {
            return Err(SessionError::NotRunning("feature watcher".into()));
        }
        sim.deliver(Audience::Everyone, &announce::watcher_state("End portal", false));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stops every engine, waits for their tasks, and returns to idle.
    ///
    /// Idempotent; returns whether anything was running.
    pub async fn shutdown(&self) -> bool {
        let (timer, objective, feature, changed) = {
            let mut slots = self.slots();
            let timer = slots.timer.take();
            let objective = slots.objective.take();
            let feature = slots.feature.take();
            slots.prep_mode = None;
            slots.outcome = None;
            let mut changed = false;
            let current = self.state.snapshot();
            if current.phase != Phase::Idle {
                changed |= self.advance(current, Phase::Idle).is_some();
            }
            (timer, objective, feature, changed)
        };

        let mut stopped = changed;
        if let Some(t) = timer {
            stopped |= t.engine.stop();
            t.engine.join().await;
        }
        for watcher in [objective, feature].into_iter().flatten() {
            stopped |= watcher.stop();
            watcher.join().await;
        }
        if stopped {
            info!("session engines shut down");
        }
        stopped
    }
}

impl std::fmt::Debug for PhaseController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseController")
            .field("state", &self.state.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Vec3;
    use crate::sandbox::{SandboxHost, SandboxWorld};
    use crate::session::SessionContext;

    fn session() -> (SandboxWorld, SandboxHost, SessionContext) {
        let world = SandboxWorld::new();
        let ctx = SessionContext::new(
            Arc::new(SessionConfig::default()),
            Handle::current(),
            world.probe(),
        );
        let host = world.host();
        (world, host, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn stale_countdown_completion_is_ignored() {
        let (_world, mut host, ctx) = session();
        let ctl = ctx.controller();
        ctl.start_countdown(&mut host, Some(5)).unwrap();
        let first = ctl.snapshot();

        ctl.stop_countdown(&mut host).unwrap();
        ctl.start_countdown(&mut host, Some(50)).unwrap();
        ctl.complete_countdown(&mut host, first, 5);

        assert_eq!(ctl.phase(), Phase::CountdownRunning);
        assert_eq!(ctl.remaining(), Some(50));
        assert_eq!(ctl.status().outcome, None);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_only_leaves_ended() {
        let (_world, mut host, ctx) = session();
        let ctl = ctx.controller();
        assert!(!ctl.reset().unwrap());

        ctl.start_countdown(&mut host, Some(5)).unwrap();
        assert!(matches!(ctl.reset(), Err(SessionError::AlreadyRunning(_))));

        ctl.complete_countdown(&mut host, ctl.snapshot(), 5);
        assert_eq!(ctl.phase(), Phase::Ended);
        assert!(matches!(
            ctl.start(&mut host, None),
            Err(SessionError::AlreadyRunning(_))
        ));

        assert!(ctl.reset().unwrap());
        assert_eq!(ctl.phase(), Phase::Idle);
        assert_eq!(ctl.status().outcome, None);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_recorded_winner_ends_the_session() {
        let (world, mut host, ctx) = session();
        let alice = world.join("alice", Vec3::new(0.0, 64.0, 0.0), false);
        let bob = world.join("bob", Vec3::new(0.0, 64.0, 0.0), false);
        let ctl = ctx.controller();

        let impostor = Winner {
            participant: bob,
            name: "bob".into(),
            at: Utc::now(),
        };
        assert!(!ctl.declare_winner(&mut host, impostor));
        assert_eq!(ctl.phase(), Phase::Idle);

        let participant = host.participant(alice).unwrap();
        let winner = ctx.objective().claim(&participant).unwrap();
        assert!(ctx.objective().claim(&host.participant(bob).unwrap()).is_none());
        assert!(ctl.declare_winner(&mut host, winner.clone()));
        assert_eq!(ctl.phase(), Phase::Ended);
        assert_eq!(ctl.status().outcome, Some(Outcome::Winner(winner.clone())));
        assert!(!ctl.declare_winner(&mut host, winner));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_needs_an_active_session() {
        let (world, mut host, ctx) = session();
        world.join("alice", Vec3::new(0.0, 64.0, 0.0), false);
        let ctl = ctx.controller();
        assert!(matches!(
            ctl.cancel(&mut host, None),
            Err(SessionError::NotRunning(_))
        ));

        ctl.start(&mut host, None).unwrap();
        assert_eq!(ctl.status().prep_mode, Some(PrepMode::SpawnSelection));
        assert_eq!(ctl.cancel(&mut host, None).unwrap(), 1);
        assert_eq!(ctl.phase(), Phase::Idle);
        assert_eq!(ctl.status().timer, None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_twice_reports_once() {
        let (_world, mut host, ctx) = session();
        let ctl = ctx.controller();
        ctl.start_countdown(&mut host, Some(30)).unwrap();
        ctl.start_feature_watch(&mut host).unwrap();
        assert!(ctl.shutdown().await);
        assert!(!ctl.shutdown().await);
        assert_eq!(ctl.phase(), Phase::Idle);
    }
}

//! Session context: every registry, engine and hook of one competition.
//!
//! A [`SessionContext`] is built once at startup and handed by reference
//! to the command console and the host hooks. The host calls
//! [`SessionContext::on_host_tick`] from its simulation loop; that is the
//! only place deferred tasks run.

pub mod controller;
pub mod phase;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::host::{InterceptorChain, ParticipantId, Simulation, TeamProvider, Verdict, WorldProbe};
use crate::observability::{Event, EventEmitter};
use crate::permission::PermissionGate;
use crate::tasks::{TaskQueue, TaskSender};
use crate::teams::TeamRegistry;
use crate::watcher::FeatureRecords;
use crate::watcher::objective::ObjectiveTracker;

pub use controller::{ControllerParts, Outcome, PhaseController, PrepMode, SessionStatus};
pub use phase::{Phase, SessionState, Snapshot};

/// The single explicit owner of session state.
pub struct SessionContext {
    config: Arc<SessionConfig>,
    queue: TaskQueue,
    gate: Arc<PermissionGate>,
    teams: Arc<TeamRegistry>,
    features: Arc<FeatureRecords>,
    objective: Arc<ObjectiveTracker>,
    controller: Arc<PhaseController>,
    interceptors: InterceptorChain,
    probe: Arc<dyn WorldProbe>,
    team_provider: Option<Arc<dyn TeamProvider>>,
    events: Arc<EventEmitter>,
    host_tick: AtomicU64,
    shut_down: AtomicBool,
}

impl SessionContext {
    /// Builds a context whose engines run on `runtime` and read the world
    /// through `probe`. Events are discarded until
    /// [`with_events`](Self::with_events) installs an emitter.
    #[must_use]
    pub fn new(config: Arc<SessionConfig>, runtime: Handle, probe: Arc<dyn WorldProbe>) -> Self {
        Self::build(config, runtime, probe, Arc::new(EventEmitter::noop()))
    }

    /// Same as [`new`](Self::new) with an explicit event emitter.
    #[must_use]
    pub fn with_events(
        config: Arc<SessionConfig>,
        runtime: Handle,
        probe: Arc<dyn WorldProbe>,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self::build(config, runtime, probe, events)
    }

    fn build(
        config: Arc<SessionConfig>,
        runtime: Handle,
        probe: Arc<dyn WorldProbe>,
        events: Arc<EventEmitter>,
    ) -> Self {
        let queue = TaskQueue::new();
        let gate = Arc::new(PermissionGate::new());
        let teams = Arc::new(TeamRegistry::new());
        let features = Arc::new(FeatureRecords::new(
            config.feature_watch.min_distance,
            config.feature_watch.ttl,
        ));
        let objective = Arc::new(ObjectiveTracker::new());
        let controller = PhaseController::new(ControllerParts {
            config: Arc::clone(&config),
            runtime,
            sender: queue.sender(),
            teams: Arc::clone(&teams),
            features: Arc::clone(&features),
            objective: Arc::clone(&objective),
            probe: Arc::clone(&probe),
            events: Arc::clone(&events),
        });
        let interceptors = InterceptorChain::new();
        interceptors.register(Arc::clone(&gate) as Arc<dyn crate::host::CommandInterceptor>);

        Self {
            config,
            queue,
            gate,
            teams,
            features,
            objective,
            controller,
            interceptors,
            probe,
            team_provider: None,
            events,
            host_tick: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Installs the external team provider, when the add-on is present.
    #[must_use]
    pub fn with_team_provider(mut self, provider: Option<Arc<dyn TeamProvider>>) -> Self {
        if let Some(p) = &provider {
            info!(provider = p.name(), "external team provider detected");
        }
        self.team_provider = provider;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Session settings.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Phase controller.
    #[must_use]
    pub fn controller(&self) -> &PhaseController {
        &self.controller
    }

    /// Permission gate.
    #[must_use]
    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Team registry.
    #[must_use]
    pub fn teams(&self) -> &TeamRegistry {
        &self.teams
    }

    /// Feature records.
    #[must_use]
    pub fn features(&self) -> &FeatureRecords {
        &self.features
    }

    /// Win-condition progress.
    #[must_use]
    pub fn objective(&self) -> &ObjectiveTracker {
        &self.objective
    }

    /// Thread-safe world reads.
    #[must_use]
    pub fn probe(&self) -> &dyn WorldProbe {
        self.probe.as_ref()
    }

    /// External team provider, if installed.
    #[must_use]
    pub fn team_provider(&self) -> Option<&dyn TeamProvider> {
        self.team_provider.as_deref()
    }

    /// Command interceptor chain; the permission gate is registered first.
    #[must_use]
    pub const fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    /// Structured event sink.
    #[must_use]
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Producer handle on the simulation-thread queue.
    #[must_use]
    pub fn sender(&self) -> TaskSender {
        self.queue.sender()
    }

    /// Tasks waiting for the next drain.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.queue.pending()
    }

    // ------------------------------------------------------------------
    // Host hooks
    // ------------------------------------------------------------------

    /// Per-tick hook. Drains the task queue and, every configured number
    /// of ticks, reconciles the permission gate. Returns tasks run.
    pub fn on_host_tick(&self, sim: &mut dyn Simulation) -> usize {
        let tick = self.host_tick.fetch_add(1, Ordering::SeqCst) + 1;
        let ran = self.queue.drain(sim);
        if tick % self.config.permissions.reconcile_every_ticks.max(1) == 0 {
            self.gate.reconcile(sim);
        }
        ran
    }

    /// Host ticks seen so far.
    #[must_use]
    pub fn host_ticks(&self) -> u64 {
        self.host_tick.load(Ordering::SeqCst)
    }

    /// Command-interception hook: whether a participant's raw command may
    /// reach the host dispatcher.
    #[must_use]
    pub fn intercept(&self, participant: ParticipantId, raw: &str) -> Verdict {
        self.interceptors.intercept(participant, raw)
    }

    /// Join hook: re-applies a revoked participant's restriction.
    pub fn on_participant_join(&self, sim: &mut dyn Simulation, participant: ParticipantId) {
        if self.gate.on_join(sim, participant) {
            debug!(participant = %participant, "restriction re-applied on join");
        }
        if let Some(team) = self.teams.team_of(participant) {
            sim.assign_scoreboard_team(participant, Some(team));
        }
    }

    /// Stops every engine, returns to idle, clears the registries and
    /// closes the queue. Tasks already queued can still be drained.
    ///
    /// Idempotent; returns `true` only for the first call.
    pub async fn shutdown(&self, reason: &str) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.controller.shutdown().await;
        self.queue.close();
        self.gate.clear();
        self.teams.clear();
        self.features.clear();
        self.objective.reset();
        info!(reason, "session shut down");
        self.events.emit(Event::SessionStopped {
            timestamp: Utc::now(),
            reason: reason.to_owned(),
        });
        true
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("phase", &self.controller.phase())
            .field("pending_tasks", &self.queue.pending())
            .field("disabled", &self.gate.len())
            .field("team_members", &self.teams.len())
            .field("features", &self.features.len())
            .finish_non_exhaustive()
    }
}

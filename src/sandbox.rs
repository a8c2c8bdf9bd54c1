//! In-memory host world.
//!
//! [`SandboxWorld`] keeps a small model of connected participants, feature
//! blocks and objective progress behind a lock. [`SandboxHost`] is its
//! simulation-thread view ([`Simulation`]); [`SandboxProbe`] its
//! thread-safe read view ([`WorldProbe`]). The `arbiter run` binary and the
//! test suites both drive sessions against it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::EngineError;
use crate::host::{
    Audience, BlockPos, Dimension, Notice, Participant, ParticipantId, PlayMode, Simulation,
    StatusEffect, Vec3, WorldProbe,
};
use crate::teams::TeamColor;

#[derive(Debug, Clone)]
struct Body {
    participant: Participant,
    online: bool,
    elevated: bool,
    mode: PlayMode,
    effects: Vec<StatusEffect>,
    refreshes: usize,
    inbox: Vec<Notice>,
    scoreboard: Option<TeamColor>,
}

#[derive(Debug, Default)]
struct World {
    order: Vec<ParticipantId>,
    bodies: HashMap<ParticipantId, Body>,
    features: HashSet<(Dimension, BlockPos)>,
    objective: HashSet<ParticipantId>,
    scoreboard_teams: HashSet<TeamColor>,
    outbox: Vec<(Audience, Notice)>,
    probe_failure: Option<String>,
}

impl World {
    fn online(&self) -> impl Iterator<Item = &Body> {
        self.order
            .iter()
            .filter_map(|id| self.bodies.get(id))
            .filter(|b| b.online)
    }
}

/// Shared in-memory world.
#[derive(Debug, Clone, Default)]
pub struct SandboxWorld {
    inner: Arc<RwLock<World>>,
}

impl SandboxWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, World> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, World> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulation-thread handle.
    #[must_use]
    pub fn host(&self) -> SandboxHost {
        SandboxHost {
            world: self.clone(),
        }
    }

    /// Thread-safe read handle.
    #[must_use]
    pub fn probe(&self) -> Arc<dyn WorldProbe> {
        Arc::new(SandboxProbe {
            world: self.clone(),
        })
    }

    /// Connects a participant. A returning name keeps its identity.
    pub fn join(&self, name: &str, position: Vec3, elevated: bool) -> ParticipantId {
        let mut world = self.write();
        let existing = world
            .bodies
            .values()
            .find(|b| b.participant.name.eq_ignore_ascii_case(name))
            .map(|b| b.participant.id);
        if let Some(id) = existing {
            if let Some(body) = world.bodies.get_mut(&id) {
                body.online = true;
                body.participant.position = position;
            }
            return id;
        }
        let id = ParticipantId::new();
        world.order.push(id);
        world.bodies.insert(
            id,
            Body {
                participant: Participant {
                    id,
                    name: name.to_owned(),
                    position,
                    dimension: Dimension::Overworld,
                },
                online: true,
                elevated,
                mode: PlayMode::Survival,
                effects: Vec::new(),
                refreshes: 0,
                inbox: Vec::new(),
                scoreboard: None,
            },
        );
        id
    }

    /// Disconnects a participant. Returns whether they were online.
    pub fn leave(&self, id: ParticipantId) -> bool {
        self.write()
            .bodies
            .get_mut(&id)
            .is_some_and(|b| std::mem::replace(&mut b.online, false))
    }

    /// Identity registered for `name`, online or not.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<ParticipantId> {
        self.read()
            .bodies
            .values()
            .find(|b| b.participant.name.eq_ignore_ascii_case(name))
            .map(|b| b.participant.id)
    }

    /// Display name registered for `id`.
    #[must_use]
    pub fn name_of(&self, id: ParticipantId) -> Option<String> {
        self.read().bodies.get(&id).map(|b| b.participant.name.clone())
    }

    /// Moves a participant, possibly across dimensions.
    pub fn move_to(&self, id: ParticipantId, position: Vec3, dimension: Dimension) {
        if let Some(body) = self.write().bodies.get_mut(&id) {
            body.participant.position = position;
            body.participant.dimension = dimension;
        }
    }

    /// Marks the win objective as satisfied for a participant.
    pub fn complete_objective(&self, id: ParticipantId) {
        self.write().objective.insert(id);
    }

    /// Places a feature block.
    pub fn place_feature(&self, dimension: Dimension, pos: BlockPos) {
        self.write().features.insert((dimension, pos));
    }

    /// Removes a feature block. Returns whether it existed.
    pub fn remove_feature(&self, dimension: &Dimension, pos: BlockPos) -> bool {
        self.write().features.remove(&(dimension.clone(), pos))
    }

    /// Makes every probe call fail with `reason`, or succeed again with `None`.
    pub fn fail_probes(&self, reason: Option<&str>) {
        self.write().probe_failure = reason.map(str::to_owned);
    }

    /// Grants or removes elevation out of band.
    pub fn set_elevated(&self, id: ParticipantId, elevated: bool) {
        if let Some(body) = self.write().bodies.get_mut(&id) {
            body.elevated = elevated;
        }
    }

    /// Whether the participant is elevated.
    #[must_use]
    pub fn is_elevated(&self, id: ParticipantId) -> bool {
        self.read().bodies.get(&id).is_some_and(|b| b.elevated)
    }

    /// Current interaction mode.
    #[must_use]
    pub fn mode(&self, id: ParticipantId) -> Option<PlayMode> {
        self.read().bodies.get(&id).map(|b| b.mode)
    }

    /// Active status effects.
    #[must_use]
    pub fn effects(&self, id: ParticipantId) -> Vec<StatusEffect> {
        self.read()
            .bodies
            .get(&id)
            .map(|b| b.effects.clone())
            .unwrap_or_default()
    }

    /// Current position.
    #[must_use]
    pub fn position(&self, id: ParticipantId) -> Option<Vec3> {
        self.read().bodies.get(&id).map(|b| b.participant.position)
    }

    /// How many times the participant's command tree was re-sent.
    #[must_use]
    pub fn command_refreshes(&self, id: ParticipantId) -> usize {
        self.read().bodies.get(&id).map_or(0, |b| b.refreshes)
    }

    /// Scoreboard team mirrored for the participant.
    #[must_use]
    pub fn scoreboard_team(&self, id: ParticipantId) -> Option<TeamColor> {
        self.read().bodies.get(&id).and_then(|b| b.scoreboard)
    }

    /// Whether the scoreboard team for `color` exists.
    #[must_use]
    pub fn has_scoreboard_team(&self, color: TeamColor) -> bool {
        self.read().scoreboard_teams.contains(&color)
    }

    /// Every notice delivered to the participant.
    #[must_use]
    pub fn notices_for(&self, id: ParticipantId) -> Vec<Notice> {
        self.read()
            .bodies
            .get(&id)
            .map(|b| b.inbox.clone())
            .unwrap_or_default()
    }

    /// Chat lines and title headlines delivered to the participant.
    #[must_use]
    pub fn messages_for(&self, id: ParticipantId) -> Vec<String> {
        self.notices_for(id)
            .into_iter()
            .flat_map(|n| {
                let mut lines = n.lines;
                if let Some(title) = n.title {
                    lines.push(title.headline);
                    lines.extend(title.subtitle);
                }
                lines
            })
            .collect()
    }

    /// Drains every delivery made since the last call, in order.
    pub fn take_outbox(&self) -> Vec<(Audience, Notice)> {
        std::mem::take(&mut self.write().outbox)
    }
}

/// Simulation-thread view of a [`SandboxWorld`].
#[derive(Debug, Clone)]
pub struct SandboxHost {
    world: SandboxWorld,
}

impl SandboxHost {
    /// The world this host mutates.
    #[must_use]
    pub const fn world(&self) -> &SandboxWorld {
        &self.world
    }

    fn with_body(&self, id: ParticipantId, f: impl FnOnce(&mut Body)) {
        if let Some(body) = self.world.write().bodies.get_mut(&id) {
            f(body);
        }
    }
}

impl Simulation for SandboxHost {
    fn online(&self) -> Vec<Participant> {
        self.world
            .read()
            .online()
            .map(|b| b.participant.clone())
            .collect()
    }

    fn deliver(&mut self, audience: Audience, notice: &Notice) {
        let mut world = self.world.write();
        let recipients: Vec<_> = world
            .online()
            .map(|b| b.participant.id)
            .filter(|id| audience.includes(*id))
            .collect();
        for id in recipients {
            if let Some(body) = world.bodies.get_mut(&id) {
                body.inbox.push(notice.clone());
            }
        }
        world.outbox.push((audience, notice.clone()));
    }

    fn teleport(&mut self, id: ParticipantId, to: Vec3) {
        self.with_body(id, |b| b.participant.position = to);
    }

    fn set_mode(&mut self, id: ParticipantId, mode: PlayMode) {
        self.with_body(id, |b| b.mode = mode);
    }

    fn clear_effects(&mut self, id: ParticipantId) {
        self.with_body(id, |b| b.effects.clear());
    }

    fn apply_effect(&mut self, id: ParticipantId, effect: StatusEffect) {
        self.with_body(id, |b| {
            b.effects.retain(|e| e.kind != effect.kind);
            b.effects.push(effect);
        });
    }

    fn is_elevated(&self, id: ParticipantId) -> bool {
        self.world.is_elevated(id)
    }

    fn set_elevated(&mut self, id: ParticipantId, elevated: bool) {
        self.world.set_elevated(id, elevated);
    }

    fn refresh_commands(&mut self, id: ParticipantId) {
        self.with_body(id, |b| b.refreshes += 1);
    }

    fn ensure_scoreboard_team(&mut self, color: TeamColor) {
        self.world.write().scoreboard_teams.insert(color);
    }

    fn assign_scoreboard_team(&mut self, id: ParticipantId, team: Option<TeamColor>) {
        if let Some(color) = team {
            self.ensure_scoreboard_team(color);
        }
        self.with_body(id, |b| b.scoreboard = team);
    }
}

/// Read-only, thread-safe view of a [`SandboxWorld`].
#[derive(Debug, Clone)]
pub struct SandboxProbe {
    world: SandboxWorld,
}

impl SandboxProbe {
    fn check(world: &World) -> Result<(), EngineError> {
        world
            .probe_failure
            .as_ref()
            .map_or(Ok(()), |reason| Err(EngineError::ProbeUnavailable(reason.clone())))
    }
}

impl WorldProbe for SandboxProbe {
    fn participants(&self) -> Result<Vec<Participant>, EngineError> {
        let world = self.world.read();
        Self::check(&world)?;
        Ok(world.online().map(|b| b.participant.clone()).collect())
    }

    fn has_completed_objective(&self, id: ParticipantId) -> Result<bool, EngineError> {
        let world = self.world.read();
        Self::check(&world)?;
        Ok(world.objective.contains(&id))
    }

    fn features_near(
        &self,
        dimension: &Dimension,
        center: BlockPos,
        horizontal: i32,
        vertical: i32,
    ) -> Result<Vec<BlockPos>, EngineError> {
        let world = self.world.read();
        Self::check(&world)?;
        let mut found: Vec<_> = world
            .features
            .iter()
            .filter(|(dim, pos)| {
                dim == dimension
                    && (pos.x - center.x).abs() <= horizontal
                    && (pos.z - center.z).abs() <= horizontal
                    && (pos.y - center.y).abs() <= vertical
            })
            .map(|(_, pos)| *pos)
            .collect();
        found.sort_by_key(|p| (p.x, p.y, p.z));
        Ok(found)
    }

    fn feature_present(&self, dimension: &Dimension, pos: BlockPos) -> Result<bool, EngineError> {
        let world = self.world.read();
        Self::check(&world)?;
        Ok(world.features.contains(&(dimension.clone(), pos)))
    }
}

//! Interfaces to the hosting simulation.
//!
//! The coordinator never owns the world. It reaches it through three narrow
//! seams:
//!
//! - [`Simulation`]: mutating access, only ever used on the simulation
//!   thread (command handlers and the per-tick drain of the task queue).
//! - [`WorldProbe`]: read-only, thread-safe snapshots used by background
//!   watchers to decide *what* should happen.
//! - [`CommandInterceptor`]: middleware consulted before raw participant
//!   commands reach the host dispatcher.
//!
//! An optional [`TeamProvider`] bridges to an external team add-on.

pub mod types;

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::EngineError;
use crate::teams::TeamColor;

pub use types::{
    Audience, BlockPos, Dimension, EffectKind, Notice, Participant, ParticipantId, PlayMode,
    Sound, SoundCue, StatusEffect, Title, Vec3,
};

/// Mutating access to the hosting simulation.
///
/// Implementations are not required to be thread-safe: the coordinator only
/// calls them from the simulation thread.
pub trait Simulation {
    /// Every currently connected participant.
    fn online(&self) -> Vec<Participant>;

    /// Looks up an online participant by identity.
    fn participant(&self, id: ParticipantId) -> Option<Participant> {
        self.online().into_iter().find(|p| p.id == id)
    }

    /// Looks up an online participant by display name (case-insensitive).
    fn find(&self, name: &str) -> Option<Participant> {
        self.online()
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Delivers a notice to an audience.
    fn deliver(&mut self, audience: Audience, notice: &Notice);

    /// Moves a participant.
    fn teleport(&mut self, id: ParticipantId, to: Vec3);

    /// Switches a participant's interaction mode.
    fn set_mode(&mut self, id: ParticipantId, mode: PlayMode);

    /// Removes all status effects from a participant.
    fn clear_effects(&mut self, id: ParticipantId);

    /// Applies a timed status effect.
    fn apply_effect(&mut self, id: ParticipantId, effect: StatusEffect);

    /// Whether the participant holds the elevated capability.
    fn is_elevated(&self, id: ParticipantId) -> bool;

    /// Grants or removes the elevated capability.
    fn set_elevated(&mut self, id: ParticipantId, elevated: bool);

    /// Re-sends the participant's available command tree.
    fn refresh_commands(&mut self, id: ParticipantId);

    /// Creates (or refreshes) the host-side scoreboard team for a color.
    fn ensure_scoreboard_team(&mut self, color: TeamColor);

    /// Mirrors a team assignment onto the host scoreboard. `None` leaves any team.
    fn assign_scoreboard_team(&mut self, id: ParticipantId, team: Option<TeamColor>);
}

/// Thread-safe, read-only view of the world for background watchers.
pub trait WorldProbe: Send + Sync {
    /// Snapshot of every connected participant.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ProbeUnavailable`] when the world cannot be read.
    fn participants(&self) -> Result<Vec<Participant>, EngineError>;

    /// Whether the participant has satisfied the win objective.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ProbeUnavailable`] when the world cannot be read.
    fn has_completed_objective(&self, id: ParticipantId) -> Result<bool, EngineError>;

    /// Feature blocks within `horizontal` blocks on x/z and `vertical` blocks
    /// on y of `center`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ProbeUnavailable`] when the world cannot be read.
    fn features_near(
        &self,
        dimension: &Dimension,
        center: BlockPos,
        horizontal: i32,
        vertical: i32,
    ) -> Result<Vec<BlockPos>, EngineError>;

    /// Whether a feature block still exists at `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ProbeUnavailable`] when the world cannot be read.
    fn feature_present(&self, dimension: &Dimension, pos: BlockPos) -> Result<bool, EngineError>;
}

/// Outcome of a command interception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Pass the command on to the host dispatcher.
    Forward,
    /// Drop the command and show the participant this message.
    Deny(String),
}

impl Verdict {
    /// Whether the command may be forwarded.
    #[must_use]
    pub const fn is_forward(&self) -> bool {
        matches!(self, Self::Forward)
    }
}

/// Middleware consulted before a participant's raw command is dispatched.
pub trait CommandInterceptor: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Decides whether `raw` (without the leading slash) may be forwarded.
    fn intercept(&self, participant: ParticipantId, raw: &str) -> Verdict;
}

/// Ordered set of interceptors; the first denial wins.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: RwLock<Vec<Arc<dyn CommandInterceptor>>>,
}

impl InterceptorChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor.
    pub fn register(&self, interceptor: Arc<dyn CommandInterceptor>) {
        tracing::debug!(interceptor = interceptor.name(), "registering command interceptor");
        self.interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(interceptor);
    }

    /// Number of registered interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no interceptor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every interceptor in registration order.
    #[must_use]
    pub fn intercept(&self, participant: ParticipantId, raw: &str) -> Verdict {
        let raw = raw.strip_prefix('/').unwrap_or(raw);
        let interceptors = self
            .interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for interceptor in interceptors.iter() {
            if let Verdict::Deny(message) = interceptor.intercept(participant, raw) {
                tracing::debug!(
                    interceptor = interceptor.name(),
                    %participant,
                    command = raw,
                    "command vetoed"
                );
                return Verdict::Deny(message);
            }
        }
        Verdict::Forward
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.len())
            .finish()
    }
}

/// A team as reported by an external team add-on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTeam {
    /// Team name as the add-on shows it
    pub name: String,
    /// Member display names
    pub members: Vec<String>,
}

/// Optional bridge to an external team-management add-on.
///
/// The coordinator holds this as `Option<Arc<dyn TeamProvider>>` and never
/// assumes it is present.
pub trait TeamProvider: Send + Sync {
    /// Name of the add-on.
    fn name(&self) -> &str;

    /// Teams currently defined by the add-on.
    fn teams(&self) -> Vec<ProviderTeam>;
}

//! Team assignment registry and spawn averaging.
//!
//! Membership is stored as a single `participant -> team` map entry, so a
//! participant can never be in two teams: moving is one atomic replace of
//! that entry.

pub mod color;

use std::collections::{BTreeMap, HashMap};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::host::{ParticipantId, Vec3};

pub use color::TeamColor;

/// Result of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// The participant had no team.
    Fresh,
    /// The participant was moved from another team.
    Moved {
        /// Previous team
        from: TeamColor,
    },
    /// The participant was already in this team.
    Unchanged,
}

/// A participant's registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Assigned team
    pub team: TeamColor,
    /// Display name at assignment time
    pub name: String,
}

/// Spawn bucket: a team, or everyone without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpawnGroup {
    /// Members of a team.
    Team(TeamColor),
    /// Participants without a team.
    Ungrouped,
}

impl std::fmt::Display for SpawnGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Team(color) => write!(f, "{}", color.display_name()),
            Self::Ungrouped => f.write_str("Ungrouped"),
        }
    }
}

/// Arithmetic mean of positions, `None` for an empty input.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_position<'a>(positions: impl IntoIterator<Item = &'a Vec3>) -> Option<Vec3> {
    let (sum, count) = positions
        .into_iter()
        .fold((Vec3::default(), 0_usize), |(acc, n), p| {
            (Vec3::new(acc.x + p.x, acc.y + p.y, acc.z + p.z), n + 1)
        });
    (count > 0).then(|| {
        let n = count as f64;
        Vec3::new(sum.x / n, sum.y / n, sum.z / n)
    })
}

/// Concurrent participant-to-team registry.
#[derive(Debug, Default)]
pub struct TeamRegistry {
    members: DashMap<ParticipantId, Membership>,
    spawns: DashMap<SpawnGroup, Vec3>,
}

impl TeamRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a participant in `team`, leaving any previous team in the same
    /// atomic step.
    pub fn assign(&self, id: ParticipantId, name: &str, team: TeamColor) -> Assignment {
        let previous = self.members.insert(
            id,
            Membership {
                team,
                name: name.to_owned(),
            },
        );
        let outcome = match previous {
            None => Assignment::Fresh,
            Some(prev) if prev.team == team => Assignment::Unchanged,
            Some(prev) => Assignment::Moved { from: prev.team },
        };
        debug!(participant = %id, team = %team, ?outcome, "team assigned");
        outcome
    }

    /// Removes a participant from their team; returns the team they left.
    pub fn remove(&self, id: ParticipantId) -> Option<TeamColor> {
        self.members.remove(&id).map(|(_, m)| m.team)
    }

    /// The participant's current team.
    #[must_use]
    pub fn team_of(&self, id: ParticipantId) -> Option<TeamColor> {
        self.members.get(&id).map(|m| m.team)
    }

    /// Every member of `team`.
    #[must_use]
    pub fn members_of(&self, team: TeamColor) -> Vec<ParticipantId> {
        self.members
            .iter()
            .filter(|m| m.team == team)
            .map(|m| *m.key())
            .collect()
    }

    /// Every registry entry.
    #[must_use]
    pub fn memberships(&self) -> Vec<(ParticipantId, Membership)> {
        self.members
            .iter()
            .map(|m| (*m.key(), m.value().clone()))
            .collect()
    }

    /// Number of assigned participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether nobody is assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Removes every assignment and computed spawn; returns how many
    /// participants were unassigned.
    pub fn clear(&self) -> usize {
        let cleared = self.members.len();
        self.members.clear();
        self.spawns.clear();
        cleared
    }

    /// Mean position of the team's members that appear in `positions`.
    ///
    /// Members without a known position are ignored; a team with no
    /// resolvable position yields `None`.
    #[must_use]
    pub fn average_position(
        &self,
        team: TeamColor,
        positions: &HashMap<ParticipantId, Vec3>,
    ) -> Option<Vec3> {
        let members = self.members_of(team);
        mean_position(members.iter().filter_map(|id| positions.get(id)))
    }

    /// Computes and stores one spawn per group from the given positions.
    ///
    /// Participants with a position but no team are averaged into
    /// [`SpawnGroup::Ungrouped`]. Teams with no resolvable position get no
    /// spawn.
    pub fn compute_spawns(
        &self,
        positions: &HashMap<ParticipantId, Vec3>,
    ) -> BTreeMap<SpawnGroup, Vec3> {
        self.spawns.clear();
        let mut buckets: BTreeMap<SpawnGroup, Vec<Vec3>> = BTreeMap::new();
        for (id, pos) in positions {
            let group = self
                .team_of(*id)
                .map_or(SpawnGroup::Ungrouped, SpawnGroup::Team);
            buckets.entry(group).or_default().push(*pos);
        }

        for team in TeamColor::ALL {
            if !self.members_of(team).is_empty() && !buckets.contains_key(&SpawnGroup::Team(team)) {
                warn!(team = %team, "team has no resolvable member positions; no spawn computed");
            }
        }

        let mut spawns = BTreeMap::new();
        for (group, points) in buckets {
            if let Some(spawn) = mean_position(&points) {
                debug!(group = %group, members = points.len(), spawn = %spawn, "spawn computed");
                self.spawns.insert(group, spawn);
                spawns.insert(group, spawn);
            }
        }
        spawns
    }

    /// The spawn stored by the last computation for `group`.
    #[must_use]
    pub fn spawn_for(&self, group: SpawnGroup) -> Option<Vec3> {
        self.spawns.get(&group).map(|s| *s)
    }
}
